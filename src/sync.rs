use crate::errors::SyncError;
use crate::gateway::{Action, Envelope, Gateway};
use crate::guard::{RequestToken, Subject};
use crate::models::{AppData, EntityId};
use crate::state::{AppState, Outcome, SyncPhase};
use crate::storage::KeyValueStore;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

impl<G: Gateway, S: KeyValueStore> AppState<G, S> {
    /// Loads the cached dataset into memory. Returns whether a cache existed.
    pub async fn hydrate(&self) -> bool {
        let cached = self.cache.load().await;
        let selected = self.cache.load_selected_member().await;

        let hydrated = {
            let mut club = self.lock().await;
            club.selected_member = selected;
            match cached {
                Some(data) => {
                    info!(
                        "hydrated {} periods, {} members, {} events from cache",
                        data.periods.len(),
                        data.members.len(),
                        data.events.len()
                    );
                    club.data = data;
                    club.hydrated = true;
                    if club.phase == SyncPhase::Uninitialized {
                        club.phase = SyncPhase::HydratedFromCache;
                    }
                    true
                }
                None => false,
            }
        };

        if hydrated {
            self.rerender();
        }
        hydrated
    }

    /// Hydrates from cache, then revalidates against the server in the background.
    pub async fn start(&self) -> JoinHandle<()> {
        self.hydrate().await;
        let token = self.begin_sync().await;
        let state = self.clone();
        tokio::spawn(async move {
            let envelope = state.gateway.call(Action::GetInitialData, Value::Null).await;
            if let Err(err) = state.finish_sync(token, envelope).await {
                error!("background sync failed: {err}");
            }
        })
    }

    /// Fetches the full dataset and replaces the in-memory state with it.
    pub async fn revalidate(&self) -> Result<Outcome<()>, SyncError> {
        let token = self.begin_sync().await;
        let envelope = self.gateway.call(Action::GetInitialData, Value::Null).await;
        self.finish_sync(token, envelope).await
    }

    async fn begin_sync(&self) -> RequestToken {
        let mut club = self.lock().await;
        club.phase = SyncPhase::Syncing;
        club.guard.issue(Subject::InitialData)
    }

    async fn finish_sync(&self, token: RequestToken, envelope: Envelope) -> Result<Outcome<()>, SyncError> {
        let decoded = envelope
            .into_data(Action::GetInitialData)
            .and_then(|data| {
                AppData::from_value(data).map_err(|source| SyncError::Decode {
                    action: Action::GetInitialData.as_str(),
                    source,
                })
            });

        let data = {
            let mut club = self.lock().await;
            if !club.guard.settle(&Subject::InitialData, token) {
                debug!("dropping superseded initial data response");
                return Ok(Outcome::Superseded);
            }
            match decoded {
                Ok(data) => {
                    club.data = data.clone();
                    club.phase = SyncPhase::Synced;
                    club.hydrated = true;
                    data
                }
                Err(err) => {
                    club.phase = SyncPhase::SyncFailed;
                    return Err(err);
                }
            }
        };

        info!(
            "synced {} periods, {} members, {} events",
            data.periods.len(),
            data.members.len(),
            data.events.len()
        );
        self.persist(&data).await;
        self.rerender();
        Ok(Outcome::Applied(()))
    }

    /// Remembers which member is using this device.
    pub async fn select_member(&self, member_id: EntityId) -> Result<(), SyncError> {
        {
            let mut club = self.lock().await;
            if club.data.member(&member_id).is_none() {
                return Err(SyncError::not_found("member", &member_id));
            }
            club.selected_member = Some(member_id.clone());
        }
        self.cache.save_selected_member(&member_id).await;
        self.rerender();
        Ok(())
    }

    pub async fn selected_member(&self) -> Option<EntityId> {
        self.read(|club| club.selected_member.clone()).await
    }
}

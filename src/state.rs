use crate::gateway::Gateway;
use crate::guard::RequestGuard;
use crate::models::{AppData, Comment, CommentReactions, EntityId, Photo};
use crate::storage::{CacheStore, KeyValueStore};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{watch, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Uninitialized,
    HydratedFromCache,
    Syncing,
    Synced,
    SyncFailed,
}

/// Result of a guarded request whose answer may arrive after a newer one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    Superseded,
}

/// Album data is fetched on demand and never cached across restarts.
#[derive(Debug, Clone, Default)]
pub struct AlbumState {
    pub event_names: Vec<String>,
    pub photos: BTreeMap<String, Vec<Photo>>,
    pub comments: BTreeMap<EntityId, Vec<Comment>>,
    pub reactions: BTreeMap<EntityId, CommentReactions>,
    /// Last server-confirmed reactions of comments with a toggle in flight.
    pub(crate) reaction_baselines: BTreeMap<EntityId, CommentReactions>,
    /// Last server-confirmed text of comments with an edit or delete in flight.
    pub(crate) comment_baselines: BTreeMap<EntityId, String>,
}

#[derive(Debug)]
pub struct ClubState {
    pub data: AppData,
    pub album: AlbumState,
    pub phase: SyncPhase,
    /// Set once data is in memory, from the cache or a first successful sync.
    pub hydrated: bool,
    pub selected_member: Option<EntityId>,
    pub(crate) guard: RequestGuard,
    /// Last server-confirmed versions of master records with an edit in flight.
    pub(crate) record_baselines: AppData,
}

impl Default for ClubState {
    fn default() -> Self {
        Self {
            data: AppData::default(),
            album: AlbumState::default(),
            phase: SyncPhase::Uninitialized,
            hydrated: false,
            selected_member: None,
            guard: RequestGuard::new(),
            record_baselines: AppData::default(),
        }
    }
}

/// Shared handle on the club's authoritative state and its collaborators.
///
/// All mutation happens under one lock, which is never held across a remote call.
pub struct AppState<G, S> {
    pub gateway: Arc<G>,
    pub cache: Arc<CacheStore<S>>,
    club: Arc<Mutex<ClubState>>,
    revisions: Arc<watch::Sender<u64>>,
}

impl<G, S> Clone for AppState<G, S> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            cache: Arc::clone(&self.cache),
            club: Arc::clone(&self.club),
            revisions: Arc::clone(&self.revisions),
        }
    }
}

impl<G: Gateway, S: KeyValueStore> AppState<G, S> {
    pub fn new(gateway: G, store: S) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            gateway: Arc::new(gateway),
            cache: Arc::new(CacheStore::new(store)),
            club: Arc::new(Mutex::new(ClubState::default())),
            revisions: Arc::new(revisions),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ClubState> {
        self.club.lock().await
    }

    /// Runs `f` against the current state.
    pub async fn read<R>(&self, f: impl FnOnce(&ClubState) -> R) -> R {
        f(&*self.club.lock().await)
    }

    pub async fn snapshot(&self) -> AppData {
        self.read(|club| club.data.clone()).await
    }

    pub async fn phase(&self) -> SyncPhase {
        self.read(|club| club.phase).await
    }

    /// Blocking indicator: only while no data is in memory and a sync runs.
    pub async fn is_loading(&self) -> bool {
        self.read(|club| !club.hydrated && club.phase == SyncPhase::Syncing)
            .await
    }

    /// Views re-render whenever the revision moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revisions.borrow()
    }

    pub(crate) fn rerender(&self) {
        self.revisions.send_modify(|revision| *revision += 1);
    }

    pub(crate) async fn persist(&self, data: &AppData) {
        self.cache.save(data).await;
    }
}

use crate::errors::SyncError;
use crate::gateway::{Action, Gateway};
use crate::guard::Subject;
use crate::models::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, EntityId, EntityKind, Event, MasterRecord,
    Member, Period, ProvisionalId,
};
use crate::state::{AppState, Outcome};
use crate::storage::KeyValueStore;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A member's answer for one event. Fields left out keep their recorded value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttendanceChange {
    #[serde(default)]
    pub status: Option<AttendanceStatus>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn actions_for(kind: EntityKind) -> (Action, Action, Action) {
    match kind {
        EntityKind::Period => (Action::AddPeriod, Action::UpdatePeriod, Action::DeletePeriod),
        EntityKind::Member => (Action::AddMember, Action::UpdateMember, Action::DeleteMember),
        EntityKind::Event => (Action::AddEvent, Action::UpdateEvent, Action::DeleteEvent),
    }
}

fn validate_record<T: MasterRecord>(record: &T) -> Result<(), SyncError> {
    record.validate().map_err(SyncError::invalid)
}

fn find_record_mut<'a, T: MasterRecord>(records: &'a mut [T], id: &EntityId) -> Option<&'a mut T> {
    records.iter_mut().find(|record| record.id() == id)
}

#[derive(Deserialize)]
struct AssignedId {
    id: Option<EntityId>,
}

impl<G: Gateway, S: KeyValueStore> AppState<G, S> {
    /// Records an answer locally at once and syncs it in the background.
    ///
    /// Sync failures are only logged: the next edit overwrites the record anyway.
    pub async fn update_attendance(
        &self,
        event_id: &EntityId,
        member_id: &EntityId,
        change: AttendanceChange,
    ) -> Result<JoinHandle<()>, SyncError> {
        let (record, data) = {
            let mut club = self.lock().await;
            if club.data.event(event_id).is_none() {
                return Err(SyncError::not_found("event", event_id));
            }
            if club.data.member(member_id).is_none() {
                return Err(SyncError::not_found("member", member_id));
            }
            let key = AttendanceKey::new(event_id.clone(), member_id.clone());
            let current = club.data.attendance.get(&key).cloned().unwrap_or_default();
            let record = AttendanceRecord {
                status: change.status.or(current.status),
                comment: change.comment.unwrap_or(current.comment),
            };
            club.data.attendance.insert(key, record.clone());
            (record, club.data.clone())
        };

        self.persist(&data).await;
        self.rerender();

        let payload = json!({
            "eventId": event_id,
            "memberId": member_id,
            "status": record.status.map(AttendanceStatus::as_str).unwrap_or_default(),
            "comment": record.comment,
        });
        let gateway = std::sync::Arc::clone(&self.gateway);
        Ok(tokio::spawn(async move {
            match gateway.call(Action::UpdateAttendance, payload).await.into_data(Action::UpdateAttendance) {
                Ok(_) => debug!("attendance synced"),
                Err(err) => error!("failed to sync attendance: {err}"),
            }
        }))
    }

    pub async fn add_period(&self, name: String, start_date: chrono::NaiveDate, end_date: chrono::NaiveDate) -> Result<Period, SyncError> {
        self.add_record(|id| Period {
            id,
            name,
            start_date,
            end_date,
        })
        .await
    }

    pub async fn add_member(&self, name: String, affiliation: Option<String>) -> Result<Member, SyncError> {
        self.add_record(|id| Member {
            id,
            name,
            affiliation: affiliation.filter(|text| !text.trim().is_empty()),
            join_month: None,
            leave_month: None,
        })
        .await
    }

    pub async fn add_event(&self, event: Event) -> Result<Event, SyncError> {
        self.add_record(|id| Event { id, ..event }).await
    }

    /// Creates a record under a client-generated id. Nothing is applied locally
    /// until the server accepts it.
    pub async fn add_record<T: MasterRecord>(&self, build: impl FnOnce(EntityId) -> T) -> Result<T, SyncError> {
        let provisional = ProvisionalId::generate(T::KIND.id_prefix());
        let mut record = build(provisional.id().clone());
        validate_record(&record)?;

        let (add, _, _) = actions_for(T::KIND);
        let data = self.gateway.call(add, record.wire_payload()).await.into_data(add)?;
        let assigned = serde_json::from_value::<AssignedId>(data)
            .ok()
            .and_then(|assigned| assigned.id);
        let confirmed = provisional.confirm(assigned);
        record.set_id(confirmed.id().clone());

        let data = {
            let mut club = self.lock().await;
            T::collection_mut(&mut club.data).push(record.clone());
            club.data.clone()
        };
        info!("added {} {}", T::KIND.as_str(), record.id());
        self.persist(&data).await;
        self.rerender();
        Ok(record)
    }

    /// Replaces a record optimistically. A rejection of the newest edit restores
    /// the last version the server accepted.
    pub async fn update_record<T: MasterRecord>(&self, record: T) -> Result<Outcome<T>, SyncError> {
        validate_record(&record)?;
        let id = record.id().clone();
        let subject = Subject::Record(T::KIND, id.clone());

        let token = {
            let mut club = self.lock().await;
            let Some(slot) = find_record_mut(T::collection_mut(&mut club.data), &id) else {
                return Err(SyncError::not_found(T::KIND.as_str(), &id));
            };
            let previous = std::mem::replace(slot, record.clone());
            let baselines = T::collection_mut(&mut club.record_baselines);
            if find_record_mut(baselines, &id).is_none() {
                baselines.push(previous);
            }
            club.guard.issue(subject.clone())
        };
        self.rerender();

        let (_, update, _) = actions_for(T::KIND);
        let accepted = self
            .gateway
            .call(update, record.wire_payload())
            .await
            .into_data(update);

        let (result, data) = {
            let mut club = self.lock().await;
            if !club.guard.settle(&subject, token) {
                if accepted.is_ok() {
                    if let Some(baseline) = find_record_mut(T::collection_mut(&mut club.record_baselines), &id) {
                        *baseline = record;
                    }
                }
                debug!("dropping superseded {} response for {id}", update.as_str());
                return Ok(Outcome::Superseded);
            }
            let baselines = T::collection_mut(&mut club.record_baselines);
            let baseline = baselines
                .iter()
                .position(|existing| existing.id() == &id)
                .map(|index| baselines.swap_remove(index));
            let result = match accepted {
                Ok(_) => Ok(Outcome::Applied(record)),
                Err(err) => {
                    if let (Some(baseline), Some(slot)) =
                        (baseline, find_record_mut(T::collection_mut(&mut club.data), &id))
                    {
                        *slot = baseline;
                    }
                    Err(err)
                }
            };
            (result, club.data.clone())
        };

        self.persist(&data).await;
        if let Err(err) = &result {
            warn!("rolled back {} {id}: {err}", T::KIND.as_str());
            self.rerender();
        }
        result
    }

    /// Deletes on the server first, then drops the record and its attendance locally.
    pub async fn delete_record<T: MasterRecord>(&self, id: &EntityId) -> Result<(), SyncError> {
        let exists = self
            .read(|club| T::collection(&club.data).iter().any(|record| record.id() == id))
            .await;
        if !exists {
            return Err(SyncError::not_found(T::KIND.as_str(), id));
        }

        let (_, _, delete) = actions_for(T::KIND);
        self.gateway
            .call(delete, json!({ "id": id }))
            .await
            .into_data(delete)?;

        let data = {
            let mut club = self.lock().await;
            T::collection_mut(&mut club.data).retain(|record| record.id() != id);
            T::collection_mut(&mut club.record_baselines).retain(|record| record.id() != id);
            match T::KIND {
                EntityKind::Event => club.data.attendance.retain(|key, _| &key.event_id != id),
                EntityKind::Member => {
                    club.data.attendance.retain(|key, _| &key.member_id != id);
                    if club.selected_member.as_ref() == Some(id) {
                        club.selected_member = None;
                    }
                }
                EntityKind::Period => {}
            }
            club.data.clone()
        };
        info!("deleted {} {id}", T::KIND.as_str());
        self.persist(&data).await;
        self.rerender();
        Ok(())
    }
}

impl AttendanceChange {
    pub fn status(status: AttendanceStatus) -> Self {
        Self {
            status: Some(status),
            comment: None,
        }
    }

    pub fn comment(comment: impl Into<String>) -> Self {
        Self {
            status: None,
            comment: Some(comment.into()),
        }
    }
}

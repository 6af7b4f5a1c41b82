use crate::errors::SyncError;
use crate::gateway::{Action, Gateway};
use crate::guard::Subject;
use crate::models::{Comment, CommentReactions, EntityId, Photo, ProvisionalId, ReactionType};
use crate::state::{AlbumState, AppState, Outcome};
use crate::storage::KeyValueStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// The member acting in the album.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewer {
    pub member_id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: Vec<String>,
}

#[derive(Deserialize)]
struct AlbumInit {
    #[serde(rename = "eventNames", default)]
    event_names: Vec<String>,
}

#[derive(Deserialize)]
struct AlbumImages {
    #[serde(default)]
    images: Vec<Photo>,
}

#[derive(Deserialize)]
struct SavedComment {
    #[serde(rename = "commentId")]
    comment_id: Option<EntityId>,
}

/// Counts the server answered with, or the optimistic value when it accepted
/// the toggle without counts.
fn confirmed_reactions(data: Value, optimistic: &CommentReactions) -> CommentReactions {
    if data.is_null() {
        return optimistic.clone();
    }
    serde_json::from_value(data).unwrap_or_else(|err| {
        warn!("keeping optimistic reactions, unreadable counts: {err}");
        optimistic.clone()
    })
}

fn locate_comment(album: &AlbumState, comment_id: &EntityId) -> Option<(EntityId, usize)> {
    album.comments.iter().find_map(|(photo_id, thread)| {
        thread
            .iter()
            .position(|comment| comment.id() == comment_id)
            .map(|index| (photo_id.clone(), index))
    })
}

fn comment_mut<'a>(album: &'a mut AlbumState, comment_id: &EntityId) -> Option<&'a mut Comment> {
    album
        .comments
        .values_mut()
        .flat_map(|thread| thread.iter_mut())
        .find(|comment| comment.id() == comment_id)
}

impl<G: Gateway, S: KeyValueStore> AppState<G, S> {
    /// The selected member, if any, acting as album viewer.
    pub async fn viewer(&self) -> Option<Viewer> {
        self.read(|club| {
            let member_id = club.selected_member.as_ref()?;
            let member = club.data.member(member_id)?;
            Some(Viewer {
                member_id: member.id.clone(),
                name: member.name.clone(),
            })
        })
        .await
    }

    pub async fn load_album_events(&self) -> Result<Vec<String>, SyncError> {
        let init: AlbumInit = self
            .gateway
            .call(Action::GetAlbumInitData, json!({}))
            .await
            .decode(Action::GetAlbumInitData)?;
        {
            let mut club = self.lock().await;
            club.album.event_names = init.event_names.clone();
        }
        self.rerender();
        Ok(init.event_names)
    }

    pub async fn load_photos(&self, event_name: &str) -> Result<Outcome<Vec<Photo>>, SyncError> {
        let subject = Subject::Images(event_name.to_string());
        let token = self.lock().await.guard.issue(subject.clone());

        let envelope = self
            .gateway
            .call(Action::GetAlbumImages, json!({ "eventName": event_name }))
            .await;

        let mut club = self.lock().await;
        if !club.guard.settle(&subject, token) {
            debug!("dropping superseded photo list for {event_name}");
            return Ok(Outcome::Superseded);
        }
        let images = envelope.decode::<AlbumImages>(Action::GetAlbumImages)?.images;
        club.album
            .photos
            .insert(event_name.to_string(), images.clone());
        drop(club);
        self.rerender();
        Ok(Outcome::Applied(images))
    }

    /// Uploads files one after another; a failed file does not stop the rest.
    pub async fn upload_photos(&self, event_name: &str, files: Vec<UploadFile>) -> Result<UploadReport, SyncError> {
        if event_name.trim().is_empty() || files.is_empty() {
            return Err(SyncError::invalid("an event and at least one photo are required"));
        }

        let mut report = UploadReport::default();
        let total = files.len();
        for (index, file) in files.into_iter().enumerate() {
            let payload = json!({
                "eventName": event_name,
                "fileName": file.file_name,
                "fileData": file.data_url(),
            });
            match self
                .gateway
                .call(Action::UploadAlbumImage, payload)
                .await
                .into_data(Action::UploadAlbumImage)
            {
                Ok(_) => report.uploaded += 1,
                Err(err) => {
                    error!("upload of {} failed: {err}", file.file_name);
                    report.failed.push(file.file_name);
                }
            }
            debug!("uploaded {} / {total}", index + 1);
        }
        info!("uploaded {} of {total} photos to {event_name}", report.uploaded);

        if let Err(err) = self.load_photos(event_name).await {
            warn!("failed to refresh photos of {event_name}: {err}");
        }
        Ok(report)
    }

    /// Replaces a photo's thread with the server's, keeping comments still being posted.
    pub async fn load_comments(&self, photo_id: &EntityId) -> Result<Outcome<Vec<Comment>>, SyncError> {
        let subject = Subject::Comments(photo_id.clone());
        let token = self.lock().await.guard.issue(subject.clone());

        let envelope = self
            .gateway
            .call(Action::GetAlbumComments, json!({ "photoId": photo_id }))
            .await;

        let mut club = self.lock().await;
        if !club.guard.settle(&subject, token) {
            debug!("dropping superseded comments for {photo_id}");
            return Ok(Outcome::Superseded);
        }
        let mut thread = envelope.decode::<Vec<Comment>>(Action::GetAlbumComments)?;
        let pending: Vec<Comment> = club
            .album
            .comments
            .get(photo_id)
            .into_iter()
            .flatten()
            .filter(|comment| comment.comment_id.is_pending())
            .filter(|comment| thread.iter().all(|served| served.id() != comment.id()))
            .cloned()
            .collect();
        thread.extend(pending);
        club.album.comments.insert(photo_id.clone(), thread.clone());
        drop(club);
        self.rerender();
        Ok(Outcome::Applied(thread))
    }

    /// Shows the comment at once under a pending id; removes it again if the
    /// server refuses it.
    pub async fn add_comment(&self, viewer: &Viewer, photo_id: &EntityId, text: &str) -> Result<Comment, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::invalid("comment text is required"));
        }

        let provisional = ProvisionalId::generate("c");
        let pending_id = provisional.id().clone();
        let comment = Comment {
            comment_id: provisional.clone(),
            photo_id: photo_id.clone(),
            post_user_id: viewer.member_id.clone(),
            user_name: viewer.name.clone(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.lock()
            .await
            .album
            .comments
            .entry(photo_id.clone())
            .or_default()
            .push(comment.clone());
        self.rerender();

        let payload = json!({
            "commentId": pending_id,
            "photoId": photo_id,
            "postUserId": viewer.member_id,
            "userName": viewer.name,
            "text": comment.text,
        });
        let result = self
            .gateway
            .call(Action::SaveAlbumComment, payload)
            .await
            .into_data(Action::SaveAlbumComment);

        let outcome = {
            let mut club = self.lock().await;
            let thread = club.album.comments.entry(photo_id.clone()).or_default();
            let position = thread.iter().position(|existing| existing.id() == &pending_id);
            match result {
                Ok(data) => {
                    let confirmed = serde_json::from_value::<Comment>(data.clone())
                        .map(|mut served| {
                            served.comment_id = served.comment_id.confirm(None);
                            served
                        })
                        .unwrap_or_else(|_| {
                            let assigned = serde_json::from_value::<SavedComment>(data)
                                .ok()
                                .and_then(|saved| saved.comment_id);
                            Comment {
                                comment_id: provisional.confirm(assigned),
                                ..comment
                            }
                        });
                    match position {
                        Some(index) => thread[index] = confirmed.clone(),
                        None => thread.push(confirmed.clone()),
                    }
                    Ok(confirmed)
                }
                Err(err) => {
                    if let Some(index) = position {
                        thread.remove(index);
                    }
                    Err(err)
                }
            }
        };
        self.rerender();
        outcome
    }

    /// Edits the viewer's own comment optimistically. A rejection of the newest
    /// edit restores the last text the server accepted.
    pub async fn edit_comment(&self, viewer: &Viewer, comment_id: &EntityId, text: &str) -> Result<Outcome<Comment>, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::invalid("comment text is required"));
        }
        let subject = Subject::Comment(comment_id.clone());

        let (token, edited) = {
            let mut club = self.lock().await;
            let comment = comment_mut(&mut club.album, comment_id)
                .ok_or_else(|| SyncError::not_found("comment", comment_id))?;
            if !comment.is_owned_by(&viewer.member_id) {
                return Err(SyncError::NotOwner(comment_id.clone()));
            }
            if comment.comment_id.is_pending() {
                return Err(SyncError::invalid("comment is still being posted"));
            }
            let previous_text = std::mem::replace(&mut comment.text, text.to_string());
            let edited = comment.clone();
            club.album
                .comment_baselines
                .entry(comment_id.clone())
                .or_insert(previous_text);
            (club.guard.issue(subject.clone()), edited)
        };
        self.rerender();

        let envelope = self
            .gateway
            .call(
                Action::UpdateAlbumComment,
                json!({ "commentId": comment_id, "text": text, "postUserId": viewer.member_id }),
            )
            .await;

        let accepted = envelope.into_data(Action::UpdateAlbumComment);
        let mut club = self.lock().await;
        if !club.guard.settle(&subject, token) {
            if accepted.is_ok() {
                if let Some(baseline) = club.album.comment_baselines.get_mut(comment_id) {
                    *baseline = edited.text;
                }
            }
            debug!("dropping superseded edit of comment {comment_id}");
            return Ok(Outcome::Superseded);
        }
        let baseline = club.album.comment_baselines.remove(comment_id);
        if let Err(err) = accepted {
            if let (Some(text), Some(comment)) = (baseline, comment_mut(&mut club.album, comment_id)) {
                comment.text = text;
            }
            drop(club);
            self.rerender();
            return Err(err);
        }
        Ok(Outcome::Applied(edited))
    }

    /// Removes the viewer's own comment optimistically, putting it back on rejection.
    pub async fn delete_comment(&self, viewer: &Viewer, comment_id: &EntityId) -> Result<Outcome<()>, SyncError> {
        let subject = Subject::Comment(comment_id.clone());

        let (token, photo_id, index, removed) = {
            let mut club = self.lock().await;
            let (photo_id, index) = locate_comment(&club.album, comment_id)
                .ok_or_else(|| SyncError::not_found("comment", comment_id))?;
            let thread = club.album.comments.entry(photo_id.clone()).or_default();
            if !thread[index].is_owned_by(&viewer.member_id) {
                return Err(SyncError::NotOwner(comment_id.clone()));
            }
            if thread[index].comment_id.is_pending() {
                return Err(SyncError::invalid("comment is still being posted"));
            }
            let removed = thread.remove(index);
            (club.guard.issue(subject.clone()), photo_id, index, removed)
        };
        self.rerender();

        let envelope = self
            .gateway
            .call(
                Action::DeleteAlbumComment,
                json!({ "commentId": comment_id, "postUserId": viewer.member_id }),
            )
            .await;

        let mut club = self.lock().await;
        if !club.guard.settle(&subject, token) {
            debug!("dropping superseded delete of comment {comment_id}");
            return Ok(Outcome::Superseded);
        }
        let baseline = club.album.comment_baselines.remove(comment_id);
        if let Err(err) = envelope.into_data(Action::DeleteAlbumComment) {
            let mut removed = removed;
            if let Some(text) = baseline {
                removed.text = text;
            }
            let thread = club.album.comments.entry(photo_id).or_default();
            if thread.iter().all(|comment| comment.id() != comment_id) {
                let index = index.min(thread.len());
                thread.insert(index, removed);
            }
            drop(club);
            self.rerender();
            return Err(err);
        }
        Ok(Outcome::Applied(()))
    }

    /// Refreshes reaction counts for every comment on a photo. Comments with a
    /// toggle in flight keep their optimistic value.
    pub async fn load_reactions(
        &self,
        viewer: &Viewer,
        photo_id: &EntityId,
    ) -> Result<Outcome<BTreeMap<EntityId, CommentReactions>>, SyncError> {
        let subject = Subject::Reactions(photo_id.clone());
        let token = self.lock().await.guard.issue(subject.clone());

        let envelope = self
            .gateway
            .call(
                Action::GetReactions,
                json!({ "photoId": photo_id, "userId": viewer.member_id }),
            )
            .await;

        let mut club = self.lock().await;
        if !club.guard.settle(&subject, token) {
            debug!("dropping superseded reactions for {photo_id}");
            return Ok(Outcome::Superseded);
        }
        let served = envelope.decode::<BTreeMap<EntityId, CommentReactions>>(Action::GetReactions)?;
        let mut shown = BTreeMap::new();
        for (comment_id, reactions) in served {
            if club.guard.in_flight(&Subject::Reaction(comment_id.clone())) {
                club.album
                    .reaction_baselines
                    .insert(comment_id.clone(), reactions);
            } else {
                club.album
                    .reactions
                    .insert(comment_id.clone(), reactions);
            }
            if let Some(current) = club.album.reactions.get(&comment_id) {
                shown.insert(comment_id, current.clone());
            }
        }
        drop(club);
        self.rerender();
        Ok(Outcome::Applied(shown))
    }

    /// Toggles the viewer's reaction on a comment.
    ///
    /// The toggle shows immediately. The newest answer for the comment wins: a
    /// success installs the server's counts, a failure restores the last
    /// confirmed counts, and answers to older toggles are ignored.
    pub async fn toggle_reaction(
        &self,
        viewer: &Viewer,
        comment_id: &EntityId,
        kind: ReactionType,
    ) -> Result<Outcome<CommentReactions>, SyncError> {
        let subject = Subject::Reaction(comment_id.clone());

        let (token, optimistic) = {
            let mut club = self.lock().await;
            let current = club
                .album
                .reactions
                .get(comment_id)
                .cloned()
                .unwrap_or_default();
            let optimistic = current.toggled(kind);
            club.album
                .reaction_baselines
                .entry(comment_id.clone())
                .or_insert(current);
            club.album
                .reactions
                .insert(comment_id.clone(), optimistic.clone());
            (club.guard.issue(subject.clone()), optimistic)
        };
        self.rerender();

        let envelope = self
            .gateway
            .call(
                Action::SaveReaction,
                json!({
                    "commentId": comment_id,
                    "userId": viewer.member_id,
                    "reactionType": optimistic.user_reaction,
                }),
            )
            .await;

        let result = {
            let mut club = self.lock().await;
            let accepted = envelope
                .into_data(Action::SaveReaction)
                .map(|data| confirmed_reactions(data, &optimistic));
            if !club.guard.settle(&subject, token) {
                if let Ok(confirmed) = accepted {
                    if let Some(baseline) = club.album.reaction_baselines.get_mut(comment_id) {
                        *baseline = confirmed;
                    }
                }
                debug!("dropping superseded reaction response for {comment_id}");
                return Ok(Outcome::Superseded);
            }
            let baseline = club
                .album
                .reaction_baselines
                .remove(comment_id)
                .unwrap_or_default();
            match accepted {
                Ok(confirmed) => {
                    club.album
                        .reactions
                        .insert(comment_id.clone(), confirmed.clone());
                    Ok(Outcome::Applied(confirmed))
                }
                Err(err) => {
                    club.album.reactions.insert(comment_id.clone(), baseline);
                    Err(err)
                }
            }
        };
        self.rerender();
        result
    }
}

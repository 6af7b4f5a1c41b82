use crate::album::{UploadFile, UploadReport, Viewer};
use crate::errors::{AppError, SyncError};
use crate::gateway::Gateway;
use crate::models::{
    calendar_date, AppData, Comment, EntityId, Event, MasterRecord, Member, Period, ReactionType,
};
use crate::mutations::AttendanceChange;
use crate::state::{AppState, Outcome, SyncPhase};
use crate::storage::KeyValueStore;
use crate::views::{self, EventTally, MemberRate, Selection};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Local, NaiveDate};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub phase: SyncPhase,
    pub loading: bool,
    pub revision: u64,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectMemberRequest {
    #[serde(rename = "memberId")]
    pub member_id: EntityId,
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRequest {
    #[serde(rename = "eventId")]
    pub event_id: EntityId,
    #[serde(rename = "memberId")]
    pub member_id: EntityId,
    #[serde(flatten)]
    pub change: AttendanceChange,
}

#[derive(Debug, Deserialize)]
pub struct NewPeriod {
    pub name: String,
    #[serde(rename = "startDate", with = "calendar_date")]
    pub start_date: NaiveDate,
    #[serde(rename = "endDate", with = "calendar_date")]
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct NewMember {
    pub name: String,
    #[serde(default)]
    pub affiliation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    #[serde(rename = "reactionType")]
    pub reaction_type: ReactionType,
}

#[derive(Debug, Deserialize)]
pub struct UploadedPhoto {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "contentType", default = "default_content_type")]
    pub content_type: String,
    /// Base64 file contents.
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadedPhoto>,
}

fn default_content_type() -> String {
    "image/jpeg".to_string()
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn parse_date(query: &DateQuery) -> Result<NaiveDate, AppError> {
    match query.date.as_deref() {
        Some(raw) => calendar_date::parse(raw)
            .map_err(|err| AppError::bad_request(format!("invalid date '{raw}': {err}"))),
        None => Ok(today()),
    }
}

fn outcome_response<T: Serialize>(outcome: Outcome<T>) -> Response {
    match outcome {
        Outcome::Applied(value) => Json(value).into_response(),
        Outcome::Superseded => StatusCode::ACCEPTED.into_response(),
    }
}

async fn require_viewer<G: Gateway, S: KeyValueStore>(state: &AppState<G, S>) -> Result<Viewer, AppError> {
    state
        .viewer()
        .await
        .ok_or_else(|| AppError::bad_request("select a member first"))
}

async fn status_of<G: Gateway, S: KeyValueStore>(state: &AppState<G, S>) -> StatusResponse {
    StatusResponse {
        phase: state.phase().await,
        loading: state.is_loading().await,
        revision: state.revision(),
    }
}

pub async fn status<G: Gateway, S: KeyValueStore>(State(state): State<AppState<G, S>>) -> Json<StatusResponse> {
    Json(status_of(&state).await)
}

pub async fn sync<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
) -> Result<Json<StatusResponse>, AppError> {
    state.revalidate().await?;
    Ok(Json(status_of(&state).await))
}

pub async fn data<G: Gateway, S: KeyValueStore>(State(state): State<AppState<G, S>>) -> Json<AppData> {
    Json(state.snapshot().await)
}

pub async fn selection<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Selection>, AppError> {
    let date = parse_date(&query)?;
    Ok(Json(state.read(|club| views::default_selection(&club.data, date)).await))
}

pub async fn period_events<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, AppError> {
    let id = EntityId::from(id);
    state
        .read(|club| {
            let period = club.data.period(&id)?;
            Some(
                views::events_in_period(&club.data, period)
                    .into_iter()
                    .cloned()
                    .collect::<Vec<Event>>(),
            )
        })
        .await
        .map(Json)
        .ok_or_else(|| SyncError::not_found("period", &id).into())
}

pub async fn period_rates<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MemberRate>>, AppError> {
    let id = EntityId::from(id);
    state
        .read(|club| {
            club.data
                .period(&id)
                .map(|period| views::attendance_rates(&club.data, period))
        })
        .await
        .map(Json)
        .ok_or_else(|| SyncError::not_found("period", &id).into())
}

pub async fn event_tally<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> Result<Json<EventTally>, AppError> {
    let id = EntityId::from(id);
    state
        .read(|club| {
            club.data
                .event(&id)
                .map(|event| views::event_tally(&club.data, event))
        })
        .await
        .map(Json)
        .ok_or_else(|| SyncError::not_found("event", &id).into())
}

pub async fn active_members<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<Member>>, AppError> {
    let date = parse_date(&query)?;
    Ok(Json(
        state
            .read(|club| {
                views::active_members_at(&club.data, date)
                    .into_iter()
                    .cloned()
                    .collect::<Vec<Member>>()
            })
            .await,
    ))
}

pub async fn select_member<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Json(payload): Json<SelectMemberRequest>,
) -> Result<StatusCode, AppError> {
    state.select_member(payload.member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_attendance<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Json(payload): Json<AttendanceRequest>,
) -> Result<StatusCode, AppError> {
    state
        .update_attendance(&payload.event_id, &payload.member_id, payload.change)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn add_period<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Json(payload): Json<NewPeriod>,
) -> Result<Json<Period>, AppError> {
    let period = state
        .add_period(payload.name, payload.start_date, payload.end_date)
        .await?;
    Ok(Json(period))
}

pub async fn add_member<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Json(payload): Json<NewMember>,
) -> Result<Json<Member>, AppError> {
    let member = state.add_member(payload.name, payload.affiliation).await?;
    Ok(Json(member))
}

/// The body is an event without id; the id is generated client-side.
pub async fn add_event<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Json(payload): Json<Value>,
) -> Result<Json<Event>, AppError> {
    let event: Event = with_id(payload, "")?;
    Ok(Json(state.add_event(event).await?))
}

fn with_id<T: DeserializeOwned>(mut body: Value, id: &str) -> Result<T, AppError> {
    let fields = body
        .as_object_mut()
        .ok_or_else(|| AppError::bad_request("expected a JSON object"))?;
    fields.insert("id".to_string(), Value::from(id));
    serde_json::from_value(body).map_err(|err| AppError::bad_request(err.to_string()))
}

pub async fn update_record<G: Gateway, S: KeyValueStore, T: MasterRecord + Serialize + DeserializeOwned>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    let record: T = with_id(payload, &id)?;
    Ok(outcome_response(state.update_record(record).await?))
}

pub async fn delete_record<G: Gateway, S: KeyValueStore, T: MasterRecord>(
    State(state): State<AppState<G, S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.delete_record::<T>(&EntityId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn album_events<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.load_album_events().await?))
}

pub async fn photos<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(event_name): Path<String>,
) -> Result<Response, AppError> {
    Ok(outcome_response(state.load_photos(&event_name).await?))
}

pub async fn upload_photos<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(event_name): Path<String>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadReport>, AppError> {
    let files = payload
        .files
        .into_iter()
        .map(|photo| {
            let bytes = STANDARD.decode(photo.data.as_bytes()).map_err(|err| {
                AppError::bad_request(format!("{} is not valid base64: {err}", photo.file_name))
            })?;
            Ok(UploadFile {
                file_name: photo.file_name,
                content_type: photo.content_type,
                bytes,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;
    Ok(Json(state.upload_photos(&event_name, files).await?))
}

pub async fn comments<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(photo_id): Path<String>,
) -> Result<Response, AppError> {
    Ok(outcome_response(
        state.load_comments(&EntityId::from(photo_id)).await?,
    ))
}

pub async fn add_comment<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(photo_id): Path<String>,
    Json(payload): Json<CommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let viewer = require_viewer(&state).await?;
    let comment = state
        .add_comment(&viewer, &EntityId::from(photo_id), &payload.text)
        .await?;
    Ok(Json(comment))
}

pub async fn edit_comment<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(comment_id): Path<String>,
    Json(payload): Json<CommentRequest>,
) -> Result<Response, AppError> {
    let viewer = require_viewer(&state).await?;
    let outcome = state
        .edit_comment(&viewer, &EntityId::from(comment_id), &payload.text)
        .await?;
    Ok(outcome_response(outcome))
}

pub async fn delete_comment<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(comment_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let viewer = require_viewer(&state).await?;
    match state
        .delete_comment(&viewer, &EntityId::from(comment_id))
        .await?
    {
        Outcome::Applied(()) => Ok(StatusCode::NO_CONTENT),
        Outcome::Superseded => Ok(StatusCode::ACCEPTED),
    }
}

pub async fn reactions<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(photo_id): Path<String>,
) -> Result<Response, AppError> {
    let viewer = require_viewer(&state).await?;
    let outcome = state
        .load_reactions(&viewer, &EntityId::from(photo_id))
        .await?;
    Ok(outcome_response(outcome))
}

pub async fn toggle_reaction<G: Gateway, S: KeyValueStore>(
    State(state): State<AppState<G, S>>,
    Path(comment_id): Path<String>,
    Json(payload): Json<ReactionRequest>,
) -> Result<Response, AppError> {
    let viewer = require_viewer(&state).await?;
    let outcome = state
        .toggle_reaction(&viewer, &EntityId::from(comment_id), payload.reaction_type)
        .await?;
    Ok(outcome_response(outcome))
}

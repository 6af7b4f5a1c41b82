use crate::errors::SyncError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use tracing::{debug, error, warn};

/// Every named operation the remote sheet understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetInitialData,
    UpdateAttendance,
    AddPeriod,
    UpdatePeriod,
    DeletePeriod,
    AddMember,
    UpdateMember,
    DeleteMember,
    AddEvent,
    UpdateEvent,
    DeleteEvent,
    GetAlbumInitData,
    UploadAlbumImage,
    GetAlbumImages,
    GetAlbumComments,
    SaveAlbumComment,
    UpdateAlbumComment,
    DeleteAlbumComment,
    GetReactions,
    SaveReaction,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetInitialData => "get_initial_data",
            Self::UpdateAttendance => "update_attendance",
            Self::AddPeriod => "add_period",
            Self::UpdatePeriod => "update_period",
            Self::DeletePeriod => "delete_period",
            Self::AddMember => "add_member",
            Self::UpdateMember => "update_member",
            Self::DeleteMember => "delete_member",
            Self::AddEvent => "add_event",
            Self::UpdateEvent => "update_event",
            Self::DeleteEvent => "delete_event",
            Self::GetAlbumInitData => "get_album_init_data",
            Self::UploadAlbumImage => "upload_album_image",
            Self::GetAlbumImages => "get_album_images",
            Self::GetAlbumComments => "getAlbumComments",
            Self::SaveAlbumComment => "saveAlbumComment",
            Self::UpdateAlbumComment => "update_album_comment",
            Self::DeleteAlbumComment => "delete_album_comment",
            Self::GetReactions => "get_reactions",
            Self::SaveReaction => "save_reaction",
        }
    }

    /// Pure reads travel as GET query strings, everything else as a POST body.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::GetInitialData
                | Self::GetAlbumInitData
                | Self::GetAlbumImages
                | Self::GetAlbumComments
                | Self::GetReactions
        )
    }
}

/// Tagged result of one remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success(Value),
    Error(String),
}

impl Envelope {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Interprets a decoded response body. Bodies without a `result` tag are
    /// bare read payloads and count as success.
    pub fn from_body(body: Value) -> Self {
        let Value::Object(mut fields) = body else {
            return Self::Success(body);
        };
        match fields.get("result").and_then(Value::as_str) {
            Some("success") => Self::Success(fields.remove("data").unwrap_or(Value::Null)),
            Some(_) => Self::Error(
                fields
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            ),
            None => Self::Success(Value::Object(fields)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_data(self, action: Action) -> Result<Value, SyncError> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Error(message) => Err(SyncError::Remote {
                action: action.as_str(),
                message,
            }),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, action: Action) -> Result<T, SyncError> {
        let data = self.into_data(action)?;
        serde_json::from_value(data).map_err(|source| SyncError::Decode {
            action: action.as_str(),
            source,
        })
    }
}

/// Single-endpoint RPC client. Implementations never fail: every problem is
/// reported as an error envelope.
pub trait Gateway: Send + Sync + 'static {
    fn call(&self, action: Action, payload: Value) -> impl Future<Output = Envelope> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpGateway {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.filter(|url| !url.trim().is_empty()),
        }
    }

    async fn send(&self, endpoint: &str, action: Action, payload: Value) -> Result<Envelope, reqwest::Error> {
        let fields = match payload {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                let mut fields = Map::new();
                fields.insert("payload".to_string(), other);
                fields
            }
        };

        let request = if action.is_read() {
            let mut query = vec![("action".to_string(), action.as_str().to_string())];
            query.extend(fields.into_iter().map(|(key, value)| {
                let value = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, value)
            }));
            self.client.get(endpoint).query(&query)
        } else {
            let mut body = Map::new();
            body.insert("action".to_string(), Value::from(action.as_str()));
            body.extend(fields);
            self.client.post(endpoint).json(&body)
        };

        let body: Value = request.send().await?.error_for_status()?.json().await?;
        Ok(Envelope::from_body(body))
    }
}

impl Gateway for HttpGateway {
    async fn call(&self, action: Action, payload: Value) -> Envelope {
        let Some(endpoint) = self.endpoint.as_deref() else {
            warn!("remote endpoint is not configured, skipping {}", action.as_str());
            return Envelope::error("API URL not configured");
        };

        debug!("calling {}", action.as_str());
        match self.send(endpoint, action, payload).await {
            Ok(envelope) => envelope,
            Err(err) => {
                error!("{} request failed: {err}", action.as_str());
                Envelope::error(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_success_unwraps_data() {
        let envelope = Envelope::from_body(json!({"result": "success", "data": {"n": 1}}));
        assert_eq!(envelope, Envelope::Success(json!({"n": 1})));
    }

    #[test]
    fn tagged_error_keeps_message() {
        let envelope = Envelope::from_body(json!({"result": "error", "error": "sheet locked"}));
        assert_eq!(envelope, Envelope::error("sheet locked"));
        let err = envelope.into_data(Action::SaveReaction).unwrap_err();
        assert_eq!(err.to_string(), "save_reaction failed: sheet locked");
    }

    #[test]
    fn untagged_body_is_a_read_payload() {
        let envelope = Envelope::from_body(json!({"images": []}));
        assert_eq!(envelope, Envelope::Success(json!({"images": []})));
    }

    #[test]
    fn decode_mismatch_is_reported() {
        let envelope = Envelope::Success(json!("nope"));
        let err = envelope
            .decode::<Vec<u32>>(Action::GetAlbumImages)
            .unwrap_err();
        assert!(matches!(err, SyncError::Decode { action: "get_album_images", .. }));
    }

    #[tokio::test]
    async fn unconfigured_endpoint_yields_error_envelope() {
        let gateway = HttpGateway::new(Some("  ".to_string()));
        let envelope = gateway.call(Action::GetInitialData, Value::Null).await;
        assert_eq!(envelope, Envelope::error("API URL not configured"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_error_envelope() {
        let gateway = HttpGateway::new(Some("http://127.0.0.1:9/exec".to_string()));
        let envelope = gateway
            .call(Action::UpdateAttendance, json!({"eventId": "e-1"}))
            .await;
        assert!(!envelope.is_success());
    }
}

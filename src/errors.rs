use crate::models::EntityId;
use axum::http::StatusCode;
use thiserror::Error;

/// Failures surfaced to whoever triggered an explicit action.
///
/// Transport problems never show up here on their own: the gateway folds them
/// into an error envelope, so they arrive as `Remote` like any server rejection.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{action} failed: {message}")]
    Remote {
        action: &'static str,
        message: String,
    },

    #[error("unexpected {action} response: {source}")]
    Decode {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: EntityId },

    #[error("comment {0} belongs to another member")]
    NotOwner(EntityId),

    #[error("{0}")]
    Invalid(String),
}

impl SyncError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn not_found(kind: &'static str, id: &EntityId) -> Self {
        Self::NotFound {
            kind,
            id: id.clone(),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::Remote { .. } | SyncError::Decode { .. } => StatusCode::BAD_GATEWAY,
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::NotOwner(_) => StatusCode::FORBIDDEN,
            SyncError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}

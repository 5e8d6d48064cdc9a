use crate::{models::event::EventParseError, services::ingest_service::IngestError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 502 Bad Gateway, used when a dependency call failed.
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<EventParseError> for AppError {
    fn from(err: EventParseError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidObjectKey(_) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            IngestError::Download(_)
            | IngestError::IntegrityMismatch { .. }
            | IngestError::LabelDetection(_)
            | IngestError::Persist(_) => AppError::bad_gateway(err.to_string()),
            IngestError::Scratch { .. } | IngestError::Cleanup { .. } => {
                AppError::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::label_detector::LabelDetectionError;
    use std::io;

    #[test]
    fn ingest_errors_map_to_statuses() {
        let upstream: AppError = IngestError::LabelDetection(LabelDetectionError::EmptyResponse).into();
        assert_eq!(upstream.status, StatusCode::BAD_GATEWAY);

        let cleanup: AppError = IngestError::Cleanup {
            path: "/tmp/dog.png".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .into();
        assert_eq!(cleanup.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(cleanup.message.contains("/tmp/dog.png"));

        let key: AppError = IngestError::InvalidObjectKey("../x.png".into()).into();
        assert_eq!(key.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}

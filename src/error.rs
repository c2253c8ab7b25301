use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced to callers of the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Device already configured")]
    AlreadyConfigured,

    #[error("Missing required field: {0}")]
    InvalidConfig(&'static str),

    #[error("Malformed device request: {0}")]
    MalformedRequest(String),

    #[error("No device configured")]
    NotConfigured,

    #[error("Device not connected")]
    NotConnected,

    #[error("Device command failed: {0}")]
    Command(String),
}

impl MonitorError {
    pub fn status(&self) -> StatusCode {
        match self {
            MonitorError::AlreadyConfigured
            | MonitorError::InvalidConfig(_)
            | MonitorError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            MonitorError::NotConfigured => StatusCode::NOT_FOUND,
            MonitorError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            MonitorError::Command(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for MonitorError {
    fn from(rejection: JsonRejection) -> Self {
        MonitorError::MalformedRequest(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

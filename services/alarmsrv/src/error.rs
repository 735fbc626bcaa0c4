//! Alarm Service Error Types
//!
//! Validation and state-conflict failures carry a stable string code that
//! goes back to the requester unchanged; they never mutate subsystem state.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use haven_model::ModelError;
use haven_place::PlaceId;
use serde_json::json;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, AlarmError>;

/// Alarm subsystem errors
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Malformed request (unknown mode, bad payload)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Arm rejected because an alarm is in prealert or alerting
    #[error("Cannot arm: {0}")]
    ArmInvalid(String),

    /// Arm rejected because participating devices are currently triggered
    #[error("Cannot arm, devices triggered: {0}")]
    ArmTriggered(String),

    /// No subsystem context exists for the place
    #[error("Unknown place: {0}")]
    UnknownPlace(PlaceId),

    /// Model substrate failure
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Incident service failure
    #[error("Incident service error: {0}")]
    Incident(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AlarmError {
    /// Stable error code surfaced in error response bodies
    pub fn code(&self) -> &'static str {
        match self {
            AlarmError::InvalidRequest(_) => "alarm.request.invalid",
            AlarmError::ArmInvalid(_) => "security.arm.invalid",
            AlarmError::ArmTriggered(_) => "security.arm.triggered",
            AlarmError::UnknownPlace(_) => "alarm.place.unknown",
            AlarmError::Model(_) => "alarm.model.invalid",
            AlarmError::Incident(_) => "alarm.incident.failed",
            AlarmError::Internal(_) => "alarm.internal",
        }
    }

    /// HTTP status for the error code
    fn status(&self) -> StatusCode {
        match self {
            AlarmError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AlarmError::ArmInvalid(_) | AlarmError::ArmTriggered(_) => StatusCode::CONFLICT,
            AlarmError::UnknownPlace(_) => StatusCode::NOT_FOUND,
            AlarmError::Model(ModelError::AlreadyExists(_)) => StatusCode::CONFLICT,
            AlarmError::Model(ModelError::NotFound(_)) => StatusCode::NOT_FOUND,
            AlarmError::Model(_) | AlarmError::Incident(_) | AlarmError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl IntoResponse for AlarmError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        assert_eq!(
            AlarmError::ArmInvalid("alert active".into()).code(),
            "security.arm.invalid"
        );
        assert_eq!(
            AlarmError::InvalidRequest("bad mode".into()).code(),
            "alarm.request.invalid"
        );
        assert_eq!(
            AlarmError::UnknownPlace(PlaceId::random()).code(),
            "alarm.place.unknown"
        );
    }

    #[test]
    fn test_display() {
        let err = AlarmError::ArmInvalid("SECURITY is ALERT".into());
        assert_eq!(err.to_string(), "Cannot arm: SECURITY is ALERT");
    }
}

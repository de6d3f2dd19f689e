use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// A required field is missing or malformed on a primary path.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A date/time business rule was violated.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The requested slot overlaps an active booking.
    #[error("Schedule conflict: {0}")]
    ScheduleConflict(String),

    /// The current state does not allow the requested transition.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    /// Transport-level failure: the target is down, unroutable or too slow.
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// No endpoint could be resolved for a logical service.
    #[error("Service not configured: {0}")]
    NotConfigured(String),

    /// The event bus cannot accept or deliver events.
    #[error("Event broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationFailed(_) => "VALIDATION_FAILED",
            AppError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            AppError::ScheduleConflict(_) => "SCHEDULE_CONFLICT",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Unreachable(_) => "UNREACHABLE",
            AppError::NotConfigured(_) => "NOT_CONFIGURED",
            AppError::BrokerUnavailable(_) => "BROKER_UNAVAILABLE",
            AppError::InternalError(_) => "INTERNAL",
            AppError::DatabaseError(_) => "DATABASE",
            AppError::ConfigError(_) => "CONFIG",
        }
    }

    /// Rebuild an error from its code and message, as carried across a
    /// service boundary.
    pub fn from_kind(kind: &str, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        let err = match kind {
            "VALIDATION_FAILED" => AppError::ValidationFailed(message),
            "INVALID_SCHEDULE" => AppError::InvalidSchedule(message),
            "SCHEDULE_CONFLICT" => AppError::ScheduleConflict(message),
            "INVALID_TRANSITION" => AppError::InvalidTransition(message),
            "NOT_FOUND" => AppError::NotFound(anyhow::anyhow!(message)),
            "FORBIDDEN" => AppError::Forbidden(anyhow::anyhow!(message)),
            "UNREACHABLE" => AppError::Unreachable(message),
            "NOT_CONFIGURED" => AppError::NotConfigured(message),
            "BROKER_UNAVAILABLE" => AppError::BrokerUnavailable(message),
            _ => return None,
        };
        Some(err)
    }

    /// Message without the variant prefix, suitable for end callers.
    pub fn detail(&self) -> String {
        match self {
            AppError::ValidationFailed(msg)
            | AppError::InvalidSchedule(msg)
            | AppError::ScheduleConflict(msg)
            | AppError::InvalidTransition(msg)
            | AppError::Unreachable(msg)
            | AppError::NotConfigured(msg)
            | AppError::BrokerUnavailable(msg) => msg.clone(),
            AppError::NotFound(err) | AppError::Forbidden(err) => err.to_string(),
            AppError::InternalError(_) => "Internal server error".to_string(),
            AppError::DatabaseError(_) => "Database error".to_string(),
            AppError::ConfigError(_) => "Configuration error".to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationFailed(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::BrokerUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            code: &'static str,
            error: String,
        }

        let status = match &self {
            AppError::ValidationFailed(_) | AppError::InvalidSchedule(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::ScheduleConflict(_) | AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotConfigured(_)
            | AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::ConfigError(_) => {
                tracing::error!(error = %self, "Request failed with server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: self.kind(),
                error: self.detail(),
            }),
        )
            .into_response()
    }
}

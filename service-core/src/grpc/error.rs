//! Error conversion between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `ValidationFailed`, `InvalidSchedule` | `INVALID_ARGUMENT` |
//! | `ScheduleConflict` | `ALREADY_EXISTS` |
//! | `InvalidTransition` | `FAILED_PRECONDITION` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Forbidden` | `PERMISSION_DENIED` |
//! | `Unreachable`, `BrokerUnavailable` | `UNAVAILABLE` |
//! | everything else | `INTERNAL` |
//!
//! The precise variant travels in the `x-error-kind` metadata entry so the
//! calling side can rebuild it.

use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

use crate::error::AppError;

/// gRPC metadata key carrying [`AppError::kind`].
pub const ERROR_KIND_KEY: &str = "x-error-kind";

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        let kind = self.kind();
        let mut status = match &self {
            AppError::ValidationFailed(_) | AppError::InvalidSchedule(_) => {
                Status::invalid_argument(self.detail())
            }
            AppError::ScheduleConflict(_) => Status::already_exists(self.detail()),
            AppError::InvalidTransition(_) => Status::failed_precondition(self.detail()),
            AppError::NotFound(_) => Status::not_found(self.detail()),
            AppError::Forbidden(_) => Status::permission_denied(self.detail()),
            AppError::Unreachable(_) | AppError::BrokerUnavailable(_) => {
                Status::unavailable(self.detail())
            }
            AppError::NotConfigured(_) => {
                tracing::error!(error = %self, "Service not configured");
                Status::internal(self.detail())
            }
            AppError::InternalError(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Internal error");
                Status::internal(self.detail())
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal(self.detail())
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal(self.detail())
            }
        };
        status
            .metadata_mut()
            .insert(ERROR_KIND_KEY, MetadataValue::from_static(kind));
        status
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Convert a `tonic::Status` received by a client back to an `AppError`.
///
/// The `x-error-kind` metadata wins when present; otherwise the status code
/// decides. Transport-level codes become `Unreachable`.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        if let Some(kind) = status
            .metadata()
            .get(ERROR_KIND_KEY)
            .and_then(|v| v.to_str().ok())
            && let Some(err) = AppError::from_kind(kind, status.message())
        {
            return err;
        }

        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument | Code::OutOfRange => AppError::ValidationFailed(message),
            Code::AlreadyExists => AppError::ScheduleConflict(message),
            Code::FailedPrecondition => AppError::InvalidTransition(message),
            Code::NotFound => AppError::NotFound(anyhow::anyhow!(message)),
            Code::PermissionDenied | Code::Unauthenticated => {
                AppError::Forbidden(anyhow::anyhow!(message))
            }
            Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
                AppError::Unreachable(message)
            }
            Code::Unimplemented => {
                AppError::InternalError(anyhow::anyhow!("Not implemented: {}", message))
            }
            Code::Ok => AppError::InternalError(anyhow::anyhow!("Unexpected OK status as error")),
            _ => AppError::InternalError(anyhow::anyhow!(message)),
        }
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_to_status() {
        let err = AppError::NotFound(anyhow::anyhow!("Appointment not found"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("Appointment not found"));
    }

    #[test]
    fn test_schedule_errors_map_to_invalid_argument_and_already_exists() {
        let status: Status = AppError::InvalidSchedule("weekend".into()).into();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status: Status = AppError::ScheduleConflict("overlap".into()).into();
        assert_eq!(status.code(), Code::AlreadyExists);

        let status: Status = AppError::InvalidTransition("completed".into()).into();
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn test_kind_metadata_restores_exact_variant() {
        let status: Status = AppError::InvalidSchedule("Saturday".into()).into();
        assert_eq!(
            status.metadata().get(ERROR_KIND_KEY).unwrap().to_str().unwrap(),
            "INVALID_SCHEDULE"
        );

        let err: AppError = status.into();
        assert!(matches!(err, AppError::InvalidSchedule(msg) if msg == "Saturday"));
    }

    #[test]
    fn test_status_without_metadata_uses_code() {
        let err: AppError = Status::unavailable("connection refused").into();
        assert!(matches!(err, AppError::Unreachable(_)));

        let err: AppError = Status::deadline_exceeded("slow").into();
        assert_eq!(err.kind(), "UNREACHABLE");
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let status: Status = AppError::DatabaseError(anyhow::anyhow!("mongo down")).into();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Database error");
    }
}

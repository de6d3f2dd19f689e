use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum BusError {
    /// The broker refused or could not be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A consumer handler could not apply the event; it will be redelivered.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Unavailable(err.to_string())
    }
}

impl From<AppError> for BusError {
    fn from(err: AppError) -> Self {
        BusError::Handler(err.to_string())
    }
}

impl From<BusError> for AppError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Unavailable(msg) => AppError::BrokerUnavailable(msg),
            BusError::Codec(e) => AppError::InternalError(anyhow::Error::new(e)),
            BusError::Handler(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

//! Event bus: partitioned topics, at-least-once delivery to consumer groups.
//!
//! Producers append through an [`EventBroker`]; consumers run one loop per
//! topic-partition and ack an event only after its handler succeeded.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod model;
pub mod payloads;
pub mod producer;
pub mod redis;

pub use self::broker::{Delivery, EventBroker};
pub use self::consumer::{ConsumerConfig, ConsumerHandle, EventConsumer, EventHandler};
pub use self::error::BusError;
pub use self::memory::InMemoryBroker;
pub use self::model::{APPOINTMENT_EVENTS, DomainEvent, PROPERTY_EVENTS, partition_for};
pub use self::producer::{EventProducer, ProducerConfig};
pub use self::redis::RedisStreamBroker;

use std::sync::Arc;

use crate::error::AppError;

/// Which broker implementation to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBusBackend {
    Redis { url: String, prefix: String },
    Memory,
}

impl EventBusBackend {
    /// `EVENT_BUS_BACKEND` = `redis` (default, uses `REDIS_URL`) or `memory`.
    pub fn from_env(is_prod: bool) -> Result<Self, AppError> {
        let backend = crate::config::get_env("EVENT_BUS_BACKEND", Some("redis"), false)?;
        match backend.to_lowercase().as_str() {
            "redis" => Ok(EventBusBackend::Redis {
                url: crate::config::get_env("REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
                prefix: crate::config::get_env("EVENT_BUS_PREFIX", Some("proptech"), false)?,
            }),
            "memory" => Ok(EventBusBackend::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Invalid event bus backend: {}",
                other
            ))),
        }
    }
}

/// Build the configured broker.
pub async fn connect_broker(
    backend: &EventBusBackend,
    partitions: u32,
) -> Result<Arc<dyn EventBroker>, AppError> {
    match backend {
        EventBusBackend::Redis { url, prefix } => {
            Ok(Arc::new(RedisStreamBroker::connect(url, prefix, partitions).await?))
        }
        EventBusBackend::Memory => {
            tracing::warn!("Using in-memory event broker; events do not leave this process");
            Ok(Arc::new(InMemoryBroker::new(partitions)))
        }
    }
}

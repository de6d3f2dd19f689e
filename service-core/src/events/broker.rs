use async_trait::async_trait;
use std::time::Duration;

use super::error::BusError;
use super::model::DomainEvent;

/// One event handed to a consumer, with the broker-specific id used to ack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub event: DomainEvent,
}

/// Partitioned, append-only log with consumer-group offsets.
///
/// Within one `(topic, partition)` a group sees events in append order. An
/// event fetched but not acked is returned again by the next fetch of the
/// same group.
#[async_trait]
pub trait EventBroker: Send + Sync {
    fn partitions(&self) -> u32;

    /// Append to `partition` of the event's topic; returns the delivery id.
    async fn append(&self, partition: u32, event: &DomainEvent) -> Result<String, BusError>;

    /// Up to `max` unacked events for `group`, waiting at most `wait` when
    /// none are available.
    async fn fetch(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        partition: u32,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, BusError>;

    async fn ack(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        delivery_id: &str,
    ) -> Result<(), BusError>;

    async fn health_check(&self) -> Result<(), BusError>;
}

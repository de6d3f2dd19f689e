use backoff::ExponentialBackoff;
use backoff::future::retry;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::broker::EventBroker;
use super::error::BusError;
use super::model::{DomainEvent, partition_for};
use crate::error::AppError;

/// Bounds for publish retries.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up and surface `BrokerUnavailable` after this long.
    pub max_elapsed: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct EventProducer {
    broker: Arc<dyn EventBroker>,
    config: ProducerConfig,
}

impl EventProducer {
    pub fn new(broker: Arc<dyn EventBroker>, config: ProducerConfig) -> Self {
        Self { broker, config }
    }

    pub fn broker(&self) -> &Arc<dyn EventBroker> {
        &self.broker
    }

    /// Publish and wait for the broker to acknowledge the append.
    ///
    /// Events sharing `key` land on the same partition and keep their
    /// relative order.
    pub async fn publish<P: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: &P,
    ) -> Result<DomainEvent, AppError> {
        let event_id = Uuid::new_v4().to_string();
        self.publish_with_id(topic, key, &event_id, event_type, payload)
            .await
    }

    /// Publish under an event id chosen before the first attempt. Publishing
    /// the same id again yields a duplicate that consumers recognise.
    pub async fn publish_with_id<P: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_id: &str,
        event_type: &str,
        payload: &P,
    ) -> Result<DomainEvent, AppError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
        let mut event = DomainEvent::new(topic, key, event_type, payload);
        event.event_id = event_id.to_string();
        let partition = partition_for(key, self.broker.partitions());
        let start = Instant::now();

        let backoff = ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            max_elapsed_time: Some(self.config.max_elapsed),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.broker.append(partition, &event).await.map_err(|e| match e {
                BusError::Unavailable(_) => {
                    tracing::warn!(topic, event_type, error = %e, "Publish failed, retrying");
                    backoff::Error::transient(e)
                }
                other => backoff::Error::permanent(other),
            })
        })
        .await;

        match result {
            Ok(delivery_id) => {
                metrics::counter!("events_published_total", "topic" => topic.to_string(), "outcome" => "ok")
                    .increment(1);
                tracing::info!(
                    topic,
                    event_type,
                    event_id = %event.event_id,
                    partition_key = key,
                    partition,
                    delivery_id = %delivery_id,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Event published"
                );
                Ok(event)
            }
            Err(e) => {
                metrics::counter!("events_published_total", "topic" => topic.to_string(), "outcome" => "failed")
                    .increment(1);
                tracing::error!(topic, event_type, partition_key = key, error = %e, "Event publish failed");
                Err(e.into())
            }
        }
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::broker::EventBroker;
use super::error::BusError;
use super::model::DomainEvent;

/// Applies one event. Must be idempotent: an event is redelivered until the
/// handler succeeds.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), BusError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    /// Stable name of this member within the group.
    pub consumer_name: String,
    pub topics: Vec<String>,
    pub batch_size: usize,
    pub poll_wait: Duration,
    /// Pause before a failed event is fetched again.
    pub retry_delay: Duration,
}

impl ConsumerConfig {
    pub fn new(group: &str, topics: &[&str]) -> Self {
        Self {
            group: group.to_string(),
            consumer_name: format!("{}-1", group),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            batch_size: 32,
            poll_wait: Duration::from_millis(200),
            retry_delay: Duration::from_millis(500),
        }
    }
}

pub struct EventConsumer {
    broker: Arc<dyn EventBroker>,
    config: ConsumerConfig,
}

/// Running consumer loops, one per topic-partition.
pub struct ConsumerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Stop fetching, let in-flight events finish, then wait for every loop.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Consumer loop panicked");
            }
        }
    }
}

impl EventConsumer {
    pub fn new(broker: Arc<dyn EventBroker>, config: ConsumerConfig) -> Self {
        Self { broker, config }
    }

    /// Spawn the loops. `token` is a parent: cancelling it also stops them.
    pub fn spawn(&self, handler: Arc<dyn EventHandler>, token: &CancellationToken) -> ConsumerHandle {
        let token = token.child_token();
        let mut tasks = Vec::new();

        for topic in &self.config.topics {
            for partition in 0..self.broker.partitions() {
                let worker = PartitionWorker {
                    broker: self.broker.clone(),
                    handler: handler.clone(),
                    config: self.config.clone(),
                    topic: topic.clone(),
                    partition,
                };
                tasks.push(tokio::spawn(worker.run(token.clone())));
            }
        }

        tracing::info!(
            group = %self.config.group,
            topics = ?self.config.topics,
            loops = tasks.len(),
            "Event consumer started"
        );

        ConsumerHandle { token, tasks }
    }
}

struct PartitionWorker {
    broker: Arc<dyn EventBroker>,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    topic: String,
    partition: u32,
}

impl PartitionWorker {
    async fn run(self, token: CancellationToken) {
        let group = self.config.group.as_str();
        let topic = self.topic.as_str();

        loop {
            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                fetched = self.broker.fetch(
                    group,
                    &self.config.consumer_name,
                    topic,
                    self.partition,
                    self.config.batch_size,
                    self.config.poll_wait,
                ) => fetched,
            };

            let batch = match fetched {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(group, topic, partition = self.partition, error = %e, "Fetch failed");
                    if sleep_or_cancel(&token, self.config.retry_delay).await {
                        break;
                    }
                    continue;
                }
            };

            for delivery in batch {
                // In-flight event runs to completion even when cancellation arrives.
                if !self.process(&delivery.id, &delivery.event).await {
                    sleep_or_cancel(&token, self.config.retry_delay).await;
                    break;
                }
                if token.is_cancelled() {
                    break;
                }
            }
        }

        tracing::info!(group, topic, partition = self.partition, "Consumer loop stopped");
    }

    /// Handle and ack one event. `false` means it must be redelivered.
    async fn process(&self, delivery_id: &str, event: &DomainEvent) -> bool {
        let group = self.config.group.as_str();
        let topic = self.topic.as_str();
        let start = Instant::now();

        match self.handler.handle(event).await {
            Ok(()) => {
                if let Err(e) = self
                    .broker
                    .ack(group, topic, self.partition, delivery_id)
                    .await
                {
                    tracing::warn!(group, topic, event_id = %event.event_id, error = %e, "Ack failed, event will be redelivered");
                    return false;
                }
                metrics::counter!("events_consumed_total", "topic" => topic.to_string(), "outcome" => "ok")
                    .increment(1);
                tracing::debug!(
                    group,
                    topic,
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Event handled"
                );
                true
            }
            Err(e) => {
                metrics::counter!("events_consumed_total", "topic" => topic.to_string(), "outcome" => "failed")
                    .increment(1);
                tracing::warn!(
                    group,
                    topic,
                    partition = self.partition,
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    error = %e,
                    "Handler failed, event will be redelivered"
                );
                false
            }
        }
    }
}

/// Returns `true` when cancelled before the delay elapsed.
async fn sleep_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

//! In-process broker for development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::broker::{Delivery, EventBroker};
use super::error::BusError;
use super::model::DomainEvent;

type LogKey = (String, u32);
type OffsetKey = (String, String, u32);

#[derive(Default)]
struct State {
    logs: HashMap<LogKey, Vec<DomainEvent>>,
    /// Next offset to deliver, per (group, topic, partition).
    committed: HashMap<OffsetKey, usize>,
}

pub struct InMemoryBroker {
    partitions: u32,
    state: Mutex<State>,
    appended: Notify,
    available: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(State::default()),
            appended: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            self.appended.notify_waiters();
        }
    }

    /// Forget every committed offset of `group` so it re-reads from the start.
    pub async fn reset_offsets(&self, group: &str) {
        let mut state = self.state.lock().await;
        state.committed.retain(|(g, _, _), _| g != group);
    }

    /// Every event of `topic`, partition by partition.
    pub async fn published(&self, topic: &str) -> Vec<DomainEvent> {
        let state = self.state.lock().await;
        (0..self.partitions)
            .filter_map(|p| state.logs.get(&(topic.to_string(), p)))
            .flat_map(|log| log.iter().cloned())
            .collect()
    }

    fn check_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("in-memory broker is offline".to_string()))
        }
    }

    async fn pending(&self, group: &str, topic: &str, partition: u32, max: usize) -> Vec<Delivery> {
        let state = self.state.lock().await;
        let Some(log) = state.logs.get(&(topic.to_string(), partition)) else {
            return Vec::new();
        };
        let from = state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0);

        log.iter()
            .enumerate()
            .skip(from)
            .take(max)
            .map(|(offset, event)| Delivery {
                id: offset.to_string(),
                event: event.clone(),
            })
            .collect()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl EventBroker for InMemoryBroker {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, partition: u32, event: &DomainEvent) -> Result<String, BusError> {
        self.check_available()?;
        let offset = {
            let mut state = self.state.lock().await;
            let log = state
                .logs
                .entry((event.topic.clone(), partition % self.partitions))
                .or_default();
            log.push(event.clone());
            log.len() - 1
        };
        self.appended.notify_waiters();
        Ok(offset.to_string())
    }

    async fn fetch(
        &self,
        group: &str,
        _consumer: &str,
        topic: &str,
        partition: u32,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, BusError> {
        let deadline = Instant::now() + wait;
        loop {
            self.check_available()?;

            // Register interest before checking so an append in between is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.pending(group, topic, partition, max).await;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        delivery_id: &str,
    ) -> Result<(), BusError> {
        self.check_available()?;
        let offset: usize = delivery_id
            .parse()
            .map_err(|_| BusError::Handler(format!("invalid delivery id '{}'", delivery_id)))?;

        let mut state = self.state.lock().await;
        let committed = state
            .committed
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BusError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::model::APPOINTMENT_EVENTS;

    fn event(key: &str) -> DomainEvent {
        DomainEvent::new(APPOINTMENT_EVENTS, key, "APPOINTMENT_CREATED", serde_json::json!({}))
    }

    #[tokio::test]
    async fn unacked_events_are_redelivered() {
        let broker = InMemoryBroker::new(1);
        broker.append(0, &event("a")).await.unwrap();
        broker.append(0, &event("b")).await.unwrap();

        let wait = Duration::from_millis(10);
        let first = broker.fetch("g", "c", APPOINTMENT_EVENTS, 0, 10, wait).await.unwrap();
        assert_eq!(first.len(), 2);

        broker.ack("g", APPOINTMENT_EVENTS, 0, &first[0].id).await.unwrap();
        let second = broker.fetch("g", "c", APPOINTMENT_EVENTS, 0, 10, wait).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event.partition_key, "b");
    }

    #[tokio::test]
    async fn groups_have_independent_offsets() {
        let broker = InMemoryBroker::new(1);
        let id = broker.append(0, &event("a")).await.unwrap();
        broker.ack("g1", APPOINTMENT_EVENTS, 0, &id).await.unwrap();

        let wait = Duration::from_millis(10);
        assert!(broker.fetch("g1", "c", APPOINTMENT_EVENTS, 0, 10, wait).await.unwrap().is_empty());
        assert_eq!(broker.fetch("g2", "c", APPOINTMENT_EVENTS, 0, 10, wait).await.unwrap().len(), 1);

        broker.reset_offsets("g1").await;
        assert_eq!(broker.fetch("g1", "c", APPOINTMENT_EVENTS, 0, 10, wait).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_wakes_on_append() {
        let broker = std::sync::Arc::new(InMemoryBroker::new(1));
        let reader = broker.clone();
        let handle = tokio::spawn(async move {
            reader
                .fetch("g", "c", APPOINTMENT_EVENTS, 0, 10, Duration::from_secs(5))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.append(0, &event("late")).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn offline_broker_rejects_appends() {
        let broker = InMemoryBroker::new(1);
        broker.set_available(false);
        assert!(matches!(
            broker.append(0, &event("a")).await,
            Err(BusError::Unavailable(_))
        ));
        broker.set_available(true);
        assert!(broker.append(0, &event("a")).await.is_ok());
    }
}

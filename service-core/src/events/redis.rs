//! Redis Streams broker.
//!
//! One stream per topic-partition (`{prefix}:{topic}:{partition}`), consumer
//! groups through `XREADGROUP`/`XACK`. Entries left pending by a failed
//! handler are read again (id `0`) before new entries (id `>`).

use async_trait::async_trait;
use dashmap::DashSet;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use std::time::Duration;

use super::broker::{Delivery, EventBroker};
use super::error::BusError;
use super::model::DomainEvent;

const EVENT_FIELD: &str = "event";

#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: ConnectionManager,
    prefix: String,
    partitions: u32,
    groups: std::sync::Arc<DashSet<(String, String)>>,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str, prefix: &str, partitions: u32) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        tracing::info!(url, prefix, partitions, "Connected to Redis stream broker");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            partitions: partitions.max(1),
            groups: Default::default(),
        })
    }

    fn stream_key(&self, topic: &str, partition: u32) -> String {
        format!("{}:{}:{}", self.prefix, topic, partition)
    }

    /// Create the group at the start of the stream, once per process.
    async fn ensure_group(&self, key: &str, group: &str) -> Result<(), BusError> {
        let marker = (key.to_string(), group.to_string());
        if self.groups.contains(&marker) {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(key, group, "0").await;
        match created {
            Ok(()) => {
                tracing::info!(stream = key, group, "Created consumer group");
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        self.groups.insert(marker);
        Ok(())
    }

    async fn read(
        &self,
        key: &str,
        group: &str,
        consumer: &str,
        start: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default().group(group, consumer).count(max);
        let reply: StreamReadReply = conn.xread_options(&[key], &[start], &options).await?;

        let mut deliveries = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                let decoded = entry
                    .get::<String>(EVENT_FIELD)
                    .ok_or_else(|| BusError::Handler("missing event field".to_string()))
                    .and_then(|raw| DomainEvent::from_json(&raw));

                match decoded {
                    Ok(event) => deliveries.push(Delivery {
                        id: entry.id,
                        event,
                    }),
                    Err(e) => {
                        // An undecodable entry can never succeed; drop it from the group.
                        tracing::warn!(stream = key, id = %entry.id, error = %e, "Skipping malformed stream entry");
                        let _: Result<i64, _> = conn.xack(key, group, &[&entry.id]).await;
                    }
                }
            }
        }
        Ok(deliveries)
    }
}

#[async_trait]
impl EventBroker for RedisStreamBroker {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, partition: u32, event: &DomainEvent) -> Result<String, BusError> {
        let key = self.stream_key(&event.topic, partition % self.partitions);
        let payload = event.to_json()?;
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(&key, "*", &[(EVENT_FIELD, payload)]).await?;
        Ok(id)
    }

    async fn fetch(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        partition: u32,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, BusError> {
        let key = self.stream_key(topic, partition);
        self.ensure_group(&key, group).await?;

        let pending = self.read(&key, group, consumer, "0", max).await?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        let fresh = self.read(&key, group, consumer, ">", max).await?;
        if fresh.is_empty() {
            // No BLOCK: the multiplexed connection is shared with producers.
            tokio::time::sleep(wait).await;
        }
        Ok(fresh)
    }

    async fn ack(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        delivery_id: &str,
    ) -> Result<(), BusError> {
        let key = self.stream_key(topic, partition);
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&key, group, &[delivery_id]).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

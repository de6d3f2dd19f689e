use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::BusError;

/// Property lifecycle events, keyed by property id.
pub const PROPERTY_EVENTS: &str = "property-events";
/// Appointment lifecycle events, keyed by appointment id.
pub const APPOINTMENT_EVENTS: &str = "appointment-events";

/// An immutable published fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: String,
    pub topic: String,
    pub event_type: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        topic: &str,
        partition_key: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            partition_key: partition_key.to_string(),
            payload,
            produced_at: Utc::now(),
        }
    }

    /// Decode the payload into a typed body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_json(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, BusError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Partition for a key: FNV-1a 32-bit hash modulo the partition count.
///
/// Same key, same partition, across processes and restarts.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    if partitions <= 1 {
        return 0;
    }

    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_values() {
        // FNV-1a 32 of "a" is 0xe40c292c
        assert_eq!(partition_for("a", u32::MAX), 0xe40c_292c % u32::MAX);
        assert_eq!(partition_for("", 7), 0x811c_9dc5 % 7);
    }

    #[test]
    fn same_key_same_partition() {
        let first = partition_for("appointment-42", 4);
        for _ in 0..10 {
            assert_eq!(partition_for("appointment-42", 4), first);
        }
        assert!(first < 4);
    }

    #[test]
    fn single_partition_is_zero() {
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn event_json_round_trip_keeps_payload() {
        let event = DomainEvent::new(
            APPOINTMENT_EVENTS,
            "a1",
            "APPOINTMENT_CREATED",
            serde_json::json!({"appointment_id": "a1"}),
        );
        let decoded = DomainEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }
}

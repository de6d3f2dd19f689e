//! Typed bodies for the events exchanged between services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROPERTY_CREATED: &str = "PROPERTY_CREATED";
pub const PROPERTY_UPDATED: &str = "PROPERTY_UPDATED";
pub const PROPERTY_DELETED: &str = "PROPERTY_DELETED";
pub const PROPERTY_SOLD: &str = "PROPERTY_SOLD";

pub const APPOINTMENT_CREATED: &str = "APPOINTMENT_CREATED";
pub const APPOINTMENT_CONFIRMED: &str = "APPOINTMENT_CONFIRMED";
pub const APPOINTMENT_RESCHEDULED: &str = "APPOINTMENT_RESCHEDULED";
pub const APPOINTMENT_CANCELLED: &str = "APPOINTMENT_CANCELLED";
pub const APPOINTMENT_COMPLETED: &str = "APPOINTMENT_COMPLETED";
pub const APPOINTMENT_FEEDBACK_ADDED: &str = "APPOINTMENT_FEEDBACK_ADDED";
pub const APPOINTMENT_REMINDER_DUE: &str = "APPOINTMENT_REMINDER_DUE";

/// Body of `PROPERTY_CREATED`, `PROPERTY_UPDATED` and `PROPERTY_DELETED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChanged {
    pub property_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner_id: String,
}

/// Body of `PROPERTY_SOLD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySold {
    pub property_id: String,
    #[serde(default)]
    pub property_title: String,
    pub buyer_id: String,
    pub seller_id: String,
}

/// Body of every appointment event: the state after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentSnapshot {
    pub appointment_id: String,
    pub property_id: String,
    pub requester_user_id: String,
    pub agent_user_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: String,
    pub status: String,
    /// Who triggered the change, when known.
    #[serde(default)]
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::events::payloads::AppointmentSnapshot;
use std::fmt;
use std::str::FromStr;

/// Current document layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Stored when a booking arrives without a requester.
pub const DEFAULT_REQUESTER: &str = "default_user";
/// Stored when a booking arrives without an agent.
pub const DEFAULT_AGENT: &str = "default_agent";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    /// Pending and confirmed appointments block the agent's calendar.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (*self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| AppError::ValidationFailed(format!("Unknown appointment status: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentKind {
    Viewing,
    Inspection,
    Other,
}

impl AppointmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentKind::Viewing => "viewing",
            AppointmentKind::Inspection => "inspection",
            AppointmentKind::Other => "other",
        }
    }
}

impl FromStr for AppointmentKind {
    type Err = AppError;

    /// Empty input means a viewing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "viewing" => Ok(AppointmentKind::Viewing),
            "inspection" => Ok(AppointmentKind::Inspection),
            "other" => Ok(AppointmentKind::Other),
            other => Err(AppError::ValidationFailed(format!(
                "Unknown appointment kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub status: AppointmentStatus,
    pub changed_by: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub changed_at: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    #[serde(rename = "_id")]
    pub appointment_id: String,
    pub property_id: String,
    pub requester_user_id: String,
    pub agent_user_id: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub ends_at: DateTime<Utc>,
    pub kind: AppointmentKind,
    #[serde(default)]
    pub note: String,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub history: Vec<StatusChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub reminder_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_sent: bool,
    /// Events committed with the changes they describe and not yet
    /// acknowledged by the broker, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outbox: Vec<PendingEvent>,
    pub schema_version: u32,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_utc: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_utc: DateTime<Utc>,
}

// Helper module for optional DateTime<Utc> as BSON DateTime
mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}

/// An appointment event awaiting publication. The id is fixed at commit time
/// so a republished event is the same fact to consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingEvent {
    pub event_id: String,
    pub event_type: String,
    pub snapshot: AppointmentSnapshot,
}

impl Appointment {
    /// `[scheduled_at, ends_at)` intersects `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.scheduled_at < end && start < self.ends_at
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.requester_user_id == user_id || self.agent_user_id == user_id
    }

    pub fn snapshot(&self, actor_id: &str) -> AppointmentSnapshot {
        AppointmentSnapshot {
            appointment_id: self.appointment_id.clone(),
            property_id: self.property_id.clone(),
            requester_user_id: self.requester_user_id.clone(),
            agent_user_id: self.agent_user_id.clone(),
            scheduled_at: self.scheduled_at,
            duration_minutes: self.duration_minutes,
            kind: self.kind.as_str().to_string(),
            status: self.status.as_str().to_string(),
            actor_id: actor_id.to_string(),
            rating: self.feedback.as_ref().map(|f| f.rating),
        }
    }

    /// Event describing this state, to be committed with it.
    pub fn pending_event(&self, event_type: &str, actor_id: &str) -> PendingEvent {
        PendingEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            snapshot: self.snapshot(actor_id),
        }
    }
}

/// Status change applied by a compare-and-set update.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub expected: AppointmentStatus,
    pub change: StatusChange,
    pub event: PendingEvent,
}

/// New time slot, applied only while status and start are still `expected_*`.
#[derive(Debug, Clone)]
pub struct ScheduleUpdate {
    pub expected_status: AppointmentStatus,
    pub expected_start: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reminder_at: Option<DateTime<Utc>>,
    pub event: PendingEvent,
}

/// Query over stored appointments. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    /// Requester or agent.
    pub participant: Option<String>,
    pub property_id: Option<String>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.participant
            .as_deref()
            .map_or(true, |user| appointment.involves(user))
            && self
                .property_id
                .as_deref()
                .map_or(true, |p| appointment.property_id == p)
            && self.status.map_or(true, |s| appointment.status == s)
            && self.from.map_or(true, |from| appointment.scheduled_at >= from)
            && self.to.map_or(true, |to| appointment.scheduled_at <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Zero page or limit means the default.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: if limit == 0 {
                Self::DEFAULT_LIMIT
            } else {
                limit.min(Self::MAX_LIMIT)
            },
        }
    }

    pub fn skip(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone)]
pub struct AppointmentPage {
    pub appointments: Vec<Appointment>,
    pub total: u64,
    pub page: PageRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_allows_only_forward_transitions() {
        use AppointmentStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn empty_kind_is_viewing() {
        assert_eq!("".parse::<AppointmentKind>().unwrap(), AppointmentKind::Viewing);
        assert!("party".parse::<AppointmentKind>().is_err());
    }

    #[test]
    fn page_request_clamps() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, limit: 20 });
        assert_eq!(PageRequest::new(3, 500).limit, 100);
        assert_eq!(PageRequest::new(3, 10).skip(), 20);
    }
}

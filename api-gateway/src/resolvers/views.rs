//! JSON shapes returned by the query endpoint.

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use serde::Serialize;
use service_core::grpc::proto::appointment::{
    Appointment, Feedback, GetAppointmentStatsResponse, StatusChange,
};
use service_core::grpc::{PropertySummary, UserRef};

pub fn to_datetime(ts: Option<&Timestamp>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?))
}

pub fn to_timestamp(at: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeView {
    pub status: String,
    pub changed_by: String,
    pub changed_at: Option<DateTime<Utc>>,
    pub note: String,
}

impl From<StatusChange> for StatusChangeView {
    fn from(change: StatusChange) -> Self {
        Self {
            changed_at: to_datetime(change.changed_at.as_ref()),
            status: change.status,
            changed_by: change.changed_by,
            note: change.note,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackView {
    pub rating: i32,
    pub comment: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<Feedback> for FeedbackView {
    fn from(feedback: Feedback) -> Self {
        Self {
            submitted_at: to_datetime(feedback.submitted_at.as_ref()),
            rating: feedback.rating,
            comment: feedback.comment,
        }
    }
}

/// An appointment with its participants and property embedded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: String,
    pub property_id: String,
    pub requester_user_id: String,
    pub agent_user_id: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub kind: String,
    pub note: String,
    pub status: String,
    pub history: Vec<StatusChangeView>,
    pub feedback: Option<FeedbackView>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub requester: UserRef,
    pub agent: UserRef,
    /// `None` when the property service cannot describe it.
    pub property: Option<PropertySummary>,
}

impl AppointmentView {
    pub fn new(
        appointment: Appointment,
        requester: UserRef,
        agent: UserRef,
        property: Option<PropertySummary>,
    ) -> Self {
        Self {
            scheduled_at: to_datetime(appointment.scheduled_at.as_ref()),
            created_at: to_datetime(appointment.created_at.as_ref()),
            updated_at: to_datetime(appointment.updated_at.as_ref()),
            history: appointment.history.into_iter().map(Into::into).collect(),
            feedback: appointment.feedback.map(Into::into),
            id: appointment.id,
            property_id: appointment.property_id,
            requester_user_id: appointment.requester_user_id,
            agent_user_id: appointment.agent_user_id,
            duration_minutes: appointment.duration_minutes,
            kind: appointment.kind,
            note: appointment.note,
            status: appointment.status,
            requester,
            agent,
            property,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentListView {
    pub appointments: Vec<AppointmentView>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyView {
    #[serde(flatten)]
    pub property: PropertySummary,
    pub owner: UserRef,
}

#[derive(Debug, Serialize)]
pub struct ShareView {
    pub key: String,
    pub count: u64,
    pub percentage: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub total: u64,
    pub period: String,
    pub by_status: Vec<ShareView>,
    pub by_weekday: Vec<ShareView>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl From<GetAppointmentStatsResponse> for StatsView {
    fn from(stats: GetAppointmentStatsResponse) -> Self {
        Self {
            start: to_datetime(stats.start.as_ref()),
            end: to_datetime(stats.end.as_ref()),
            total: stats.total,
            period: stats.period,
            by_status: stats
                .by_status
                .into_iter()
                .map(|s| ShareView {
                    key: s.status,
                    count: s.count,
                    percentage: s.percentage,
                })
                .collect(),
            by_weekday: stats
                .by_weekday
                .into_iter()
                .map(|w| ShareView {
                    key: w.weekday,
                    count: w.count,
                    percentage: w.percentage,
                })
                .collect(),
        }
    }
}

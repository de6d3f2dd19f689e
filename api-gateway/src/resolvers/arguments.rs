//! Typed operation arguments, decoded from the free-form `arguments` object.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use service_core::error::AppError;
use validator::Validate;

/// Decode and validate `arguments`; absent arguments decode as `{}`.
pub fn decode<T>(arguments: Value) -> Result<T, AppError>
where
    T: DeserializeOwned + Validate,
{
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    let parsed: T = serde_json::from_value(arguments)
        .map_err(|e| AppError::ValidationFailed(format!("Invalid arguments: {}", e)))?;
    parsed.validate()?;
    Ok(parsed)
}

#[derive(Debug, Deserialize, Validate)]
pub struct IdArgs {
    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UsersArgs {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentArgs {
    #[validate(length(min = 1, message = "propertyId is required"))]
    pub property_id: String,
    #[serde(default)]
    pub requester_user_id: Option<String>,
    #[serde(default)]
    pub agent_user_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default = "default_duration")]
    #[validate(range(min = 1, max = 480, message = "durationMinutes must be 1..=480"))]
    pub duration_minutes: u32,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub flexible_date: bool,
}

fn default_duration() -> u32 {
    60
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransitionArgs {
    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleArgs {
    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub flexible_date: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackArgs {
    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
    #[validate(range(min = 1, max = 5, message = "rating must be between 1 and 5"))]
    pub rating: i32,
    #[serde(default)]
    #[validate(length(max = 2000, message = "comment is too long"))]
    pub comment: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListArgs {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatsArgs {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
}

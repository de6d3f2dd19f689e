//! Upgrade appointment documents written before `schema_version` existed.
//!
//! Version 0 documents may lack participants, status or `ends_at`. The
//! upgrade fills the placeholders used for new bookings, derives `ends_at`
//! from the start and duration and stamps `schema_version = 1`.

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use service_core::error::AppError;

use crate::models::{AppointmentStatus, DEFAULT_AGENT, DEFAULT_REQUESTER, SCHEMA_VERSION};
use crate::services::AppointmentDb;

/// Duration assumed for documents that never stored one.
pub const LEGACY_DURATION_MINUTES: i64 = 60;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    pub documents_scanned: u64,
    pub documents_upgraded: u64,
    /// Documents without a start time; left untouched.
    pub documents_skipped: u64,
}

fn outdated_filter() -> Document {
    doc! {
        "$or": [
            { "schema_version": { "$exists": false } },
            { "schema_version": { "$lt": SCHEMA_VERSION as i64 } }
        ]
    }
}

fn is_blank(document: &Document, key: &str) -> bool {
    document.get_str(key).map_or(true, |v| v.trim().is_empty())
}

fn integer(document: &Document, key: &str) -> Option<i64> {
    match document.get(key) {
        Some(Bson::Int32(v)) => Some(i64::from(*v)),
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Double(v)) => Some(*v as i64),
        _ => None,
    }
}

/// The `$set` document that brings `document` to the current layout, or
/// `None` when it has no start time to derive from.
pub fn upgrade_fields(document: &Document, now: BsonDateTime) -> Option<Document> {
    let scheduled_at = *document.get_datetime("scheduled_at").ok()?;

    let mut set = doc! { "schema_version": SCHEMA_VERSION as i64 };
    if is_blank(document, "requester_user_id") {
        set.insert("requester_user_id", DEFAULT_REQUESTER);
    }
    if is_blank(document, "agent_user_id") {
        set.insert("agent_user_id", DEFAULT_AGENT);
    }
    if is_blank(document, "status") {
        set.insert("status", AppointmentStatus::Pending.as_str());
    }
    if is_blank(document, "kind") {
        set.insert("kind", "viewing");
    }

    let duration = integer(document, "duration_minutes")
        .filter(|d| *d > 0)
        .unwrap_or(LEGACY_DURATION_MINUTES);
    if integer(document, "duration_minutes") != Some(duration) {
        set.insert("duration_minutes", duration);
    }
    if document.get_datetime("ends_at").is_err() {
        set.insert(
            "ends_at",
            BsonDateTime::from_millis(scheduled_at.timestamp_millis() + duration * 60_000),
        );
    }

    if !document.contains_key("history") {
        set.insert("history", Bson::Array(Vec::new()));
    }
    if !document.contains_key("reminder_sent") {
        set.insert("reminder_sent", false);
    }
    if document.get_datetime("created_utc").is_err() {
        set.insert("created_utc", now);
    }
    set.insert("updated_utc", now);

    Some(set)
}

/// Upgrade every outdated appointment document. Idempotent.
pub async fn migrate_to_v1(db: &AppointmentDb) -> Result<MigrationResult, AppError> {
    tracing::info!("Starting appointment schema migration");

    let mut result = MigrationResult::default();
    let collection = db.raw_appointments();
    let mut cursor = collection
        .find(outdated_filter(), None)
        .await
        .map_err(AppError::from)?;

    while let Some(document) = cursor.try_next().await.map_err(AppError::from)? {
        result.documents_scanned += 1;
        let Some(id) = document.get("_id").cloned() else {
            continue;
        };

        match upgrade_fields(&document, BsonDateTime::now()) {
            Some(set) => {
                collection
                    .update_one(doc! { "_id": id }, doc! { "$set": set }, None)
                    .await
                    .map_err(AppError::from)?;
                result.documents_upgraded += 1;
            }
            None => {
                tracing::warn!(id = %id, "Appointment without start time left at version 0");
                result.documents_skipped += 1;
            }
        }
    }

    tracing::info!(
        documents_scanned = result.documents_scanned,
        documents_upgraded = result.documents_upgraded,
        documents_skipped = result.documents_skipped,
        "Appointment schema migration complete"
    );

    Ok(result)
}

pub async fn is_migration_needed(db: &AppointmentDb) -> Result<bool, AppError> {
    let count = db
        .raw_appointments()
        .count_documents(outdated_filter(), None)
        .await
        .map_err(AppError::from)?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> BsonDateTime {
        BsonDateTime::from_millis(millis)
    }

    #[test]
    fn legacy_document_gets_placeholders_and_end() {
        let legacy = doc! {
            "_id": "a1",
            "property_id": "P1",
            "requester_user_id": "",
            "scheduled_at": at(1_000_000),
        };
        let set = upgrade_fields(&legacy, at(5)).unwrap();

        assert_eq!(set.get_str("requester_user_id").unwrap(), DEFAULT_REQUESTER);
        assert_eq!(set.get_str("agent_user_id").unwrap(), DEFAULT_AGENT);
        assert_eq!(set.get_str("status").unwrap(), "pending");
        assert_eq!(set.get_i64("duration_minutes").unwrap(), 60);
        assert_eq!(
            set.get_datetime("ends_at").unwrap().timestamp_millis(),
            1_000_000 + 60 * 60_000
        );
        assert_eq!(set.get_i64("schema_version").unwrap(), 1);
    }

    #[test]
    fn existing_values_are_kept() {
        let legacy = doc! {
            "_id": "a2",
            "requester_user_id": "U1",
            "agent_user_id": "U2",
            "status": "confirmed",
            "kind": "inspection",
            "duration_minutes": 30,
            "scheduled_at": at(0),
        };
        let set = upgrade_fields(&legacy, at(5)).unwrap();

        assert!(!set.contains_key("requester_user_id"));
        assert!(!set.contains_key("agent_user_id"));
        assert!(!set.contains_key("status"));
        assert!(!set.contains_key("duration_minutes"));
        assert_eq!(set.get_datetime("ends_at").unwrap().timestamp_millis(), 30 * 60_000);
    }

    #[test]
    fn document_without_start_is_skipped() {
        assert!(upgrade_fields(&doc! { "_id": "a3" }, at(5)).is_none());
    }
}

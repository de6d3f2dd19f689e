use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::time::Duration as StdDuration;

use super::store::{has_calendar, AppointmentStore};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, Feedback, PageRequest, PendingEvent,
    ScheduleUpdate, StatusUpdate,
};

const DUPLICATE_KEY: i32 = 11000;
/// How long one booking may hold an agent's calendar lease.
const LEASE_TTL_SECS: i64 = 5;
/// Give up waiting for a busy lease after this long.
const LEASE_WAIT: StdDuration = StdDuration::from_secs(3);
const LEASE_POLL: StdDuration = StdDuration::from_millis(25);

#[derive(Clone)]
pub struct AppointmentDb {
    client: MongoClient,
    db: Database,
}

fn db_error(action: &'static str) -> impl FnOnce(mongodb::error::Error) -> AppError {
    move |e| {
        tracing::error!("Failed to {}: {}", action, e);
        AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn bson_time(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_chrono(at)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<mongodb::bson::Bson, AppError> {
    to_bson(value).map_err(|e| AppError::InternalError(anyhow::Error::new(e)))
}

/// Active appointments of `agent` intersecting `[start, end)`, optionally
/// leaving one appointment out.
fn overlap_query(
    agent: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<&str>,
) -> Document {
    let mut query = doc! {
        "agent_user_id": agent,
        "status": { "$in": [AppointmentStatus::Pending.as_str(), AppointmentStatus::Confirmed.as_str()] },
        "scheduled_at": { "$lt": bson_time(end) },
        "ends_at": { "$gt": bson_time(start) },
    };
    if let Some(id) = exclude {
        query.insert("_id", doc! { "$ne": id });
    }
    query
}

/// Matches the lease only while `owner` still holds it. Taking over an
/// expired lease rewrites `owner`, so an expired lease nobody took is still
/// held.
fn lease_owner_filter(agent: &str, owner: &str) -> Document {
    doc! { "_id": agent, "owner": owner }
}

fn lease_lost(agent: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(
        "Calendar lease of agent {} was taken over before the write completed",
        agent
    ))
}

fn conflict(agent: &str, existing: &Appointment) -> AppError {
    AppError::ScheduleConflict(format!(
        "Agent {} already has appointment {} from {} to {}",
        agent, existing.appointment_id, existing.scheduled_at, existing.ends_at
    ))
}

fn filter_document(filter: &AppointmentFilter) -> Document {
    let mut query = doc! {};
    if let Some(user) = &filter.participant {
        query.insert(
            "$or",
            vec![
                doc! { "requester_user_id": user },
                doc! { "agent_user_id": user },
            ],
        );
    }
    if let Some(property_id) = &filter.property_id {
        query.insert("property_id", property_id);
    }
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    let mut range = doc! {};
    if let Some(from) = filter.from {
        range.insert("$gte", bson_time(from));
    }
    if let Some(to) = filter.to {
        range.insert("$lte", bson_time(to));
    }
    if !range.is_empty() {
        query.insert("scheduled_at", range);
    }
    query
}

impl AppointmentDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for appointment-service");

        let indexes = [
            ("agent_schedule_idx", doc! { "agent_user_id": 1, "scheduled_at": 1 }),
            ("requester_schedule_idx", doc! { "requester_user_id": 1, "scheduled_at": 1 }),
            ("property_schedule_idx", doc! { "property_id": 1, "scheduled_at": 1 }),
            ("reminder_idx", doc! { "status": 1, "reminder_sent": 1, "reminder_at": 1 }),
        ];

        for (name, keys) in indexes {
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name.to_string()).build())
                .build();
            self.appointments()
                .create_index(index, None)
                .await
                .map_err(db_error("create appointment index"))?;
        }

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn appointments(&self) -> Collection<Appointment> {
        self.db.collection("appointments")
    }

    /// Untyped view, for documents that may predate the current layout.
    pub fn raw_appointments(&self) -> Collection<Document> {
        self.db.collection("appointments")
    }

    fn agent_locks(&self) -> Collection<Document> {
        self.db.collection("agent_locks")
    }

    /// Take the agent's calendar lease. An expired lease is taken over; a
    /// live one makes the upsert collide on `_id`.
    async fn acquire_lease(&self, agent: &str, owner: &str) -> Result<(), AppError> {
        let deadline = tokio::time::Instant::now() + LEASE_WAIT;
        let options = FindOneAndUpdateOptions::builder().upsert(true).build();

        loop {
            let now = Utc::now();
            let result = self
                .agent_locks()
                .find_one_and_update(
                    doc! { "_id": agent, "locked_until": { "$lt": bson_time(now) } },
                    doc! { "$set": {
                        "locked_until": bson_time(now + Duration::seconds(LEASE_TTL_SECS)),
                        "owner": owner,
                    } },
                    options.clone(),
                )
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) if is_duplicate_key(&e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(AppError::DatabaseError(anyhow::anyhow!(
                            "Calendar of agent {} stayed locked",
                            agent
                        )));
                    }
                    tokio::time::sleep(LEASE_POLL).await;
                }
                Err(e) => return Err(db_error("acquire agent lease")(e)),
            }
        }
    }

    async fn release_lease(&self, agent: &str, owner: &str) {
        if let Err(e) = self
            .agent_locks()
            .delete_one(doc! { "_id": agent, "owner": owner }, None)
            .await
        {
            // The lease expires on its own.
            tracing::warn!(agent, error = %e, "Failed to release agent lease");
        }
    }

    /// Whether nobody took the lease over since it was acquired.
    async fn lease_held(&self, agent: &str, owner: &str) -> Result<bool, AppError> {
        Ok(self
            .agent_locks()
            .find_one(lease_owner_filter(agent, owner), None)
            .await
            .map_err(db_error("check agent lease"))?
            .is_some())
    }

    async fn find_overlap(
        &self,
        agent: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<&str>,
    ) -> Result<Option<Appointment>, AppError> {
        self.appointments()
            .find_one(overlap_query(agent, start, end, exclude), None)
            .await
            .map_err(db_error("check agent calendar"))
    }

    /// Check-and-insert while holding the agent's lease. A lease that changed
    /// hands before the insert landed may have let another booking pass the
    /// same check, so the insert is rolled back.
    async fn insert_under_lease(&self, appointment: &Appointment, owner: &str) -> Result<(), AppError> {
        let agent = appointment.agent_user_id.as_str();
        if let Some(existing) = self
            .find_overlap(agent, appointment.scheduled_at, appointment.ends_at, None)
            .await?
        {
            return Err(conflict(agent, &existing));
        }

        self.appointments()
            .insert_one(appointment, None)
            .await
            .map_err(db_error("insert appointment"))?;

        if self.lease_held(agent, owner).await? {
            return Ok(());
        }
        tracing::warn!(agent, appointment_id = %appointment.appointment_id, "Agent lease lost, rolling back booking");
        self.appointments()
            .delete_one(doc! { "_id": &appointment.appointment_id }, None)
            .await
            .map_err(db_error("roll back appointment"))?;
        Err(lease_lost(agent))
    }

    async fn apply_schedule(
        &self,
        id: &str,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        self.appointments()
            .find_one_and_update(
                doc! {
                    "_id": id,
                    "status": update.expected_status.as_str(),
                    "scheduled_at": bson_time(update.expected_start),
                },
                doc! {
                    "$set": {
                        "scheduled_at": bson_time(update.scheduled_at),
                        "ends_at": bson_time(update.ends_at),
                        "reminder_at": update.reminder_at.map(bson_time),
                        "reminder_sent": false,
                        "updated_utc": bson_time(now),
                    },
                    "$push": { "outbox": encode(&update.event)? },
                },
                options,
            )
            .await
            .map_err(db_error("reschedule appointment"))
    }

    /// Overlap check and move while holding the agent's lease; rolled back
    /// to `previous` when the lease changed hands meanwhile.
    async fn reschedule_under_lease(
        &self,
        previous: &Appointment,
        update: &ScheduleUpdate,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let id = previous.appointment_id.as_str();
        let agent = previous.agent_user_id.as_str();
        if let Some(existing) = self
            .find_overlap(agent, update.scheduled_at, update.ends_at, Some(id))
            .await?
        {
            return Err(conflict(agent, &existing));
        }

        let Some(moved) = self.apply_schedule(id, update, now).await? else {
            return Ok(None);
        };
        if self.lease_held(agent, owner).await? {
            return Ok(Some(moved));
        }

        tracing::warn!(agent, appointment_id = id, "Agent lease lost, rolling back reschedule");
        self.appointments()
            .update_one(
                doc! { "_id": id, "scheduled_at": bson_time(update.scheduled_at) },
                doc! {
                    "$set": {
                        "scheduled_at": bson_time(previous.scheduled_at),
                        "ends_at": bson_time(previous.ends_at),
                        "reminder_at": previous.reminder_at.map(bson_time),
                        "reminder_sent": previous.reminder_sent,
                    },
                    "$pull": { "outbox": { "event_id": &update.event.event_id } },
                },
                None,
            )
            .await
            .map_err(db_error("roll back reschedule"))?;
        Err(lease_lost(agent))
    }
}

#[async_trait]
impl AppointmentStore for AppointmentDb {
    async fn insert_if_free(&self, appointment: &Appointment) -> Result<(), AppError> {
        if !has_calendar(&appointment.agent_user_id) {
            self.appointments()
                .insert_one(appointment, None)
                .await
                .map_err(db_error("insert appointment"))?;
            return Ok(());
        }

        let agent = appointment.agent_user_id.as_str();
        let owner = appointment.appointment_id.as_str();
        self.acquire_lease(agent, owner).await?;
        let result = self.insert_under_lease(appointment, owner).await;
        self.release_lease(agent, owner).await;
        result
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Appointment>, AppError> {
        self.appointments()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(db_error("find appointment"))
    }

    async fn update_status(
        &self,
        id: &str,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let change = encode(&update.change)?;
        let event = encode(&update.event)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.appointments()
            .find_one_and_update(
                doc! { "_id": id, "status": update.expected.as_str() },
                doc! {
                    "$set": { "status": update.change.status.as_str(), "updated_utc": bson_time(now) },
                    "$push": { "history": change, "outbox": event },
                },
                options,
            )
            .await
            .map_err(db_error("update appointment status"))
    }

    async fn set_feedback(
        &self,
        id: &str,
        feedback: &Feedback,
        event: &PendingEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let feedback = encode(feedback)?;
        let event = encode(event)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.appointments()
            .find_one_and_update(
                doc! { "_id": id, "status": AppointmentStatus::Completed.as_str() },
                doc! {
                    "$set": { "feedback": feedback, "updated_utc": bson_time(now) },
                    "$push": { "outbox": event },
                },
                options,
            )
            .await
            .map_err(db_error("store feedback"))
    }

    async fn reschedule_if_free(
        &self,
        id: &str,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let Some(current) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        if !has_calendar(&current.agent_user_id) {
            return self.apply_schedule(id, update, now).await;
        }

        let agent = current.agent_user_id.as_str();
        let owner = update.event.event_id.as_str();
        self.acquire_lease(agent, owner).await?;
        let result = self.reschedule_under_lease(&current, update, owner, now).await;
        self.release_lease(agent, owner).await;
        result
    }

    async fn clear_pending_event(&self, id: &str, event_id: &str) -> Result<(), AppError> {
        self.appointments()
            .update_one(
                doc! { "_id": id },
                doc! { "$pull": { "outbox": { "event_id": event_id } } },
                None,
            )
            .await
            .map_err(db_error("clear published event"))?;
        Ok(())
    }

    async fn with_pending_events(&self) -> Result<Vec<Appointment>, AppError> {
        let cursor = self
            .appointments()
            .find(doc! { "outbox.0": { "$exists": true } }, None)
            .await
            .map_err(db_error("query pending events"))?;
        cursor
            .try_collect()
            .await
            .map_err(db_error("collect pending events"))
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Appointment>, u64), AppError> {
        let query = filter_document(filter);
        let total = self
            .appointments()
            .count_documents(query.clone(), None)
            .await
            .map_err(db_error("count appointments"))?;

        let find_options = FindOptions::builder()
            .sort(doc! { "scheduled_at": 1, "_id": 1 })
            .skip(page.skip())
            .limit(i64::from(page.limit))
            .build();
        let cursor = self
            .appointments()
            .find(query, find_options)
            .await
            .map_err(db_error("list appointments"))?;
        let appointments: Vec<Appointment> = cursor
            .try_collect()
            .await
            .map_err(db_error("collect appointments"))?;

        Ok((appointments, total))
    }

    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppError> {
        let find_options = FindOptions::builder()
            .sort(doc! { "scheduled_at": 1, "_id": 1 })
            .build();
        let cursor = self
            .appointments()
            .find(filter_document(filter), find_options)
            .await
            .map_err(db_error("query appointments"))?;
        cursor
            .try_collect()
            .await
            .map_err(db_error("collect appointments"))
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, AppError> {
        let cursor = self
            .appointments()
            .find(
                doc! {
                    "status": AppointmentStatus::Confirmed.as_str(),
                    "reminder_sent": false,
                    "reminder_at": { "$lte": bson_time(now) },
                },
                None,
            )
            .await
            .map_err(db_error("query due reminders"))?;
        cursor
            .try_collect()
            .await
            .map_err(db_error("collect due reminders"))
    }

    async fn mark_reminder_sent(&self, id: &str, sent: bool) -> Result<bool, AppError> {
        let result = self
            .appointments()
            .update_one(
                doc! { "_id": id, "reminder_sent": !sent },
                doc! { "$set": { "reminder_sent": sent } },
                None,
            )
            .await
            .map_err(db_error("mark reminder"))?;
        Ok(result.modified_count == 1)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_document_includes_set_fields_only() {
        assert_eq!(filter_document(&AppointmentFilter::default()), doc! {});

        let from = Utc::now();
        let query = filter_document(&AppointmentFilter {
            participant: Some("U1".to_string()),
            status: Some(AppointmentStatus::Confirmed),
            from: Some(from),
            ..Default::default()
        });
        assert!(query.contains_key("$or"));
        assert_eq!(query.get_str("status").unwrap(), "confirmed");
        assert!(query.get_document("scheduled_at").unwrap().contains_key("$gte"));
        assert!(!query.contains_key("property_id"));
    }

    #[test]
    fn overlap_query_can_leave_out_the_moved_appointment() {
        let start = Utc::now();
        let end = start + Duration::minutes(60);

        let booking = overlap_query("U2", start, end, None);
        assert!(!booking.contains_key("_id"));
        assert_eq!(booking.get_str("agent_user_id").unwrap(), "U2");

        let moving = overlap_query("U2", start, end, Some("A1"));
        assert_eq!(moving.get_document("_id").unwrap().get_str("$ne").unwrap(), "A1");
        assert_eq!(
            moving.get_document("ends_at").unwrap().get_datetime("$gt").unwrap(),
            &bson_time(start)
        );
    }

    #[test]
    fn lease_check_matches_owner_not_expiry() {
        let filter = lease_owner_filter("U2", "A1");
        assert_eq!(filter, doc! { "_id": "U2", "owner": "A1" });
        assert!(!filter.contains_key("locked_until"));
    }
}

use chrono::{DateTime, Datelike, Duration, Months, Utc, Weekday};
use service_core::error::AppError;
use service_core::events::payloads::{
    APPOINTMENT_CANCELLED, APPOINTMENT_COMPLETED, APPOINTMENT_CONFIRMED, APPOINTMENT_CREATED,
    APPOINTMENT_FEEDBACK_ADDED, APPOINTMENT_REMINDER_DUE, APPOINTMENT_RESCHEDULED,
};
use service_core::events::{EventProducer, APPOINTMENT_EVENTS};
use std::str::FromStr;
use std::sync::Arc;
use validator::Validate;

use super::schedule::{Clock, SchedulePolicy};
use crate::models::{
    Appointment, AppointmentFilter, AppointmentKind, AppointmentPage, AppointmentStatus, Feedback,
    PageRequest, ScheduleUpdate, StatusChange, StatusUpdate, DEFAULT_AGENT, DEFAULT_REQUESTER,
    SCHEMA_VERSION,
};
use crate::services::AppointmentStore;

/// Recorded as the actor when a change arrives without one.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Default, Validate)]
pub struct BookingRequest {
    #[validate(length(min = 1, message = "Property id cannot be empty"))]
    pub property_id: String,
    pub requester_user_id: String,
    pub agent_user_id: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 480, message = "Duration must be 1 to 480 minutes"))]
    pub duration_minutes: u32,
    pub kind: String,
    pub note: String,
    pub status: String,
    pub flexible_date: bool,
}

#[derive(Debug, Clone, Validate)]
pub struct FeedbackRequest {
    pub appointment_id: String,
    pub actor_id: String,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(max = 2000, message = "Comment is too long"))]
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct RescheduleRequest {
    pub appointment_id: String,
    pub actor_id: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub flexible_date: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Cancel,
    Complete,
}

impl Transition {
    pub fn target(&self) -> AppointmentStatus {
        match self {
            Transition::Confirm => AppointmentStatus::Confirmed,
            Transition::Cancel => AppointmentStatus::Cancelled,
            Transition::Complete => AppointmentStatus::Completed,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            Transition::Confirm => APPOINTMENT_CONFIRMED,
            Transition::Cancel => APPOINTMENT_CANCELLED,
            Transition::Complete => APPOINTMENT_COMPLETED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Week,
    Month,
    Quarter,
    Year,
}

impl StatsPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsPeriod::Week => "week",
            StatsPeriod::Month => "month",
            StatsPeriod::Quarter => "quarter",
            StatsPeriod::Year => "year",
        }
    }

    /// Unknown or empty input means a month.
    pub fn parse_or_month(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "week" => StatsPeriod::Week,
            "quarter" => StatsPeriod::Quarter,
            "year" => StatsPeriod::Year,
            _ => StatsPeriod::Month,
        }
    }

    pub fn start(&self, end: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            StatsPeriod::Week => return end - Duration::days(7),
            StatsPeriod::Month => 1,
            StatsPeriod::Quarter => 3,
            StatsPeriod::Year => 12,
        };
        end.checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share<K> {
    pub key: K,
    pub count: u64,
    /// Rounded percentage of the period total.
    pub percentage: u32,
}

#[derive(Debug, Clone)]
pub struct AppointmentStats {
    pub total: u64,
    pub period: StatsPeriod,
    /// Highest count first.
    pub by_status: Vec<Share<AppointmentStatus>>,
    /// Sunday to Saturday, days without appointments omitted.
    pub by_weekday: Vec<Share<Weekday>>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Outcome of one reminder sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReminderSweep {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Outcome of one pass over appointments with unpublished events.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutboxSweep {
    pub pending: usize,
    pub flushed: usize,
    pub failed: usize,
}

pub struct AppointmentWorkflow {
    store: Arc<dyn AppointmentStore>,
    producer: EventProducer,
    policy: SchedulePolicy,
    clock: Arc<dyn Clock>,
}

impl AppointmentWorkflow {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        producer: EventProducer,
        policy: SchedulePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            producer,
            policy,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn AppointmentStore> {
        &self.store
    }

    pub fn producer(&self) -> &EventProducer {
        &self.producer
    }

    /// Validate, check the agent's calendar, persist as pending and publish
    /// `APPOINTMENT_CREATED`.
    ///
    /// The record stays stored when the publish fails; the caller then sees
    /// `BrokerUnavailable` and the event stays in the outbox until a later
    /// change or the outbox sweep publishes it.
    #[tracing::instrument(skip(self, request), fields(property_id = %request.property_id))]
    pub async fn book(&self, request: BookingRequest) -> Result<Appointment, AppError> {
        let mut appointment = self.prepare(request)?;

        match self.store.insert_if_free(&appointment).await {
            Ok(()) => {}
            Err(e) => {
                metrics::counter!("appointments_booked_total", "outcome" => e.kind()).increment(1);
                return Err(e);
            }
        }
        metrics::counter!("appointments_booked_total", "outcome" => "ok").increment(1);

        tracing::info!(
            appointment_id = %appointment.appointment_id,
            agent_user_id = %appointment.agent_user_id,
            scheduled_at = %appointment.scheduled_at,
            "Appointment booked"
        );

        self.flush(&mut appointment).await?;
        Ok(appointment)
    }

    fn prepare(&self, request: BookingRequest) -> Result<Appointment, AppError> {
        request.validate()?;

        let requester_user_id = or_sentinel(&request.requester_user_id, DEFAULT_REQUESTER, "requester_user_id");
        let agent_user_id = or_sentinel(&request.agent_user_id, DEFAULT_AGENT, "agent_user_id");
        let status_input = or_sentinel(&request.status, AppointmentStatus::Pending.as_str(), "status");
        let status = AppointmentStatus::from_str(&status_input)?;
        if status != AppointmentStatus::Pending {
            return Err(AppError::ValidationFailed(format!(
                "New appointments start as pending, got {}",
                status
            )));
        }
        let kind = AppointmentKind::from_str(&request.kind)?;

        let requested = request.scheduled_at.ok_or_else(|| {
            AppError::ValidationFailed("Scheduled time is required".to_string())
        })?;
        let now = self.clock.now();
        let scheduled_at =
            self.policy
                .validate(requested, request.duration_minutes, request.flexible_date, now)?;
        let ends_at = scheduled_at + Duration::minutes(i64::from(request.duration_minutes));

        let mut appointment = Appointment {
            appointment_id: uuid::Uuid::new_v4().to_string(),
            property_id: request.property_id.trim().to_string(),
            requester_user_id: requester_user_id.clone(),
            agent_user_id,
            scheduled_at,
            duration_minutes: request.duration_minutes,
            ends_at,
            kind,
            note: request.note,
            status,
            history: vec![StatusChange {
                status,
                changed_by: requester_user_id,
                changed_at: now,
                note: "Appointment requested".to_string(),
            }],
            feedback: None,
            reminder_at: self.policy.reminder_at(scheduled_at),
            reminder_sent: false,
            outbox: Vec::new(),
            schema_version: SCHEMA_VERSION,
            created_utc: now,
            updated_utc: now,
        };
        let created = appointment.pending_event(APPOINTMENT_CREATED, &appointment.requester_user_id);
        appointment.outbox.push(created);
        Ok(appointment)
    }

    pub async fn get(&self, id: &str) -> Result<Appointment, AppError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Appointment {} not found", id)))
    }

    pub async fn confirm(&self, id: &str, actor_id: &str, note: &str) -> Result<Appointment, AppError> {
        self.transition(id, Transition::Confirm, actor_id, note).await
    }

    pub async fn cancel(&self, id: &str, actor_id: &str, note: &str) -> Result<Appointment, AppError> {
        self.transition(id, Transition::Cancel, actor_id, note).await
    }

    pub async fn complete(&self, id: &str, actor_id: &str, note: &str) -> Result<Appointment, AppError> {
        self.transition(id, Transition::Complete, actor_id, note).await
    }

    /// Move an appointment to the transition's target status.
    ///
    /// Already being in the target status is a success without a new event
    /// or history entry; events of earlier changes still in the outbox are
    /// published first.
    #[tracing::instrument(skip(self, note))]
    pub async fn transition(
        &self,
        id: &str,
        transition: Transition,
        actor_id: &str,
        note: &str,
    ) -> Result<Appointment, AppError> {
        let target = transition.target();
        let mut current = self.get(id).await?;

        if current.status == target {
            tracing::info!(
                appointment_id = id,
                status = %target,
                pending_events = current.outbox.len(),
                "Transition already applied"
            );
            self.flush(&mut current).await?;
            return Ok(current);
        }
        if !current.status.can_transition_to(target) {
            return Err(invalid_transition(id, current.status, target));
        }

        let actor = actor_or_system(actor_id);
        let mut after = current.clone();
        after.status = target;
        let update = StatusUpdate {
            expected: current.status,
            change: StatusChange {
                status: target,
                changed_by: actor.to_string(),
                changed_at: self.clock.now(),
                note: note.to_string(),
            },
            event: after.pending_event(transition.event_type(), actor),
        };

        let mut updated = match self.store.update_status(id, &update, self.clock.now()).await? {
            Some(updated) => updated,
            None => {
                // Lost a race; the winner may have applied the same transition.
                let mut latest = self.get(id).await?;
                if latest.status == target {
                    self.flush(&mut latest).await?;
                    return Ok(latest);
                }
                return Err(invalid_transition(id, latest.status, target));
            }
        };

        metrics::counter!("appointment_transitions_total", "to" => target.as_str()).increment(1);
        tracing::info!(
            appointment_id = id,
            from = %current.status,
            to = %target,
            actor,
            "Appointment status changed"
        );

        self.flush(&mut updated).await?;
        Ok(updated)
    }

    /// Move a pending or confirmed appointment to a new start, keeping its
    /// duration and status. The new slot passes the same schedule rules as a
    /// booking and must not overlap the agent's other active appointments.
    /// Asking for the current start again is a success without event.
    #[tracing::instrument(skip(self, request), fields(appointment_id = %request.appointment_id))]
    pub async fn reschedule(&self, request: RescheduleRequest) -> Result<Appointment, AppError> {
        let requested = request.scheduled_at.ok_or_else(|| {
            AppError::ValidationFailed("Scheduled time is required".to_string())
        })?;
        let mut current = self.get(&request.appointment_id).await?;
        if !current.status.is_active() {
            return Err(AppError::InvalidTransition(format!(
                "Appointment {} is {} and cannot be rescheduled",
                current.appointment_id, current.status
            )));
        }

        let now = self.clock.now();
        let scheduled_at =
            self.policy
                .validate(requested, current.duration_minutes, request.flexible_date, now)?;
        if scheduled_at == current.scheduled_at {
            self.flush(&mut current).await?;
            return Ok(current);
        }

        let actor = actor_or_system(&request.actor_id);
        let mut after = current.clone();
        after.scheduled_at = scheduled_at;
        after.ends_at = scheduled_at + Duration::minutes(i64::from(current.duration_minutes));
        after.reminder_at = self.policy.reminder_at(scheduled_at);
        let update = ScheduleUpdate {
            expected_status: current.status,
            expected_start: current.scheduled_at,
            scheduled_at: after.scheduled_at,
            ends_at: after.ends_at,
            reminder_at: after.reminder_at,
            event: after.pending_event(APPOINTMENT_RESCHEDULED, actor),
        };

        let result = self
            .store
            .reschedule_if_free(&current.appointment_id, &update, now)
            .await;
        let outcome = match &result {
            Ok(Some(_)) => "ok",
            Ok(None) => "stale",
            Err(e) => e.kind(),
        };
        metrics::counter!("appointments_rescheduled_total", "outcome" => outcome).increment(1);

        let mut moved = match result? {
            Some(moved) => moved,
            None => {
                let mut latest = self.get(&current.appointment_id).await?;
                if latest.status.is_active() && latest.scheduled_at == scheduled_at {
                    self.flush(&mut latest).await?;
                    return Ok(latest);
                }
                return Err(AppError::InvalidTransition(format!(
                    "Appointment {} changed while being rescheduled",
                    current.appointment_id
                )));
            }
        };

        tracing::info!(
            appointment_id = %moved.appointment_id,
            from = %current.scheduled_at,
            to = %moved.scheduled_at,
            actor,
            "Appointment rescheduled"
        );
        self.flush(&mut moved).await?;
        Ok(moved)
    }

    #[tracing::instrument(skip(self, request), fields(appointment_id = %request.appointment_id))]
    pub async fn add_feedback(&self, request: FeedbackRequest) -> Result<Appointment, AppError> {
        request.validate()?;
        let current = self.get(&request.appointment_id).await?;

        if current.status != AppointmentStatus::Completed {
            return Err(AppError::InvalidTransition(format!(
                "Feedback needs a completed appointment, {} is {}",
                current.appointment_id, current.status
            )));
        }
        if current.requester_user_id != request.actor_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only the requester can leave feedback on {}",
                current.appointment_id
            )));
        }

        let now = self.clock.now();
        let feedback = Feedback {
            rating: request.rating,
            comment: request.comment,
            submitted_at: now,
        };
        let mut after = current.clone();
        after.feedback = Some(feedback.clone());
        let event = after.pending_event(APPOINTMENT_FEEDBACK_ADDED, &request.actor_id);
        let mut updated = self
            .store
            .set_feedback(&current.appointment_id, &feedback, &event, now)
            .await?
            .ok_or_else(|| {
                AppError::InvalidTransition(format!(
                    "Appointment {} is no longer completed",
                    current.appointment_id
                ))
            })?;

        self.flush(&mut updated).await?;
        Ok(updated)
    }

    /// Appointments where the user is requester or agent.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        mut filter: AppointmentFilter,
        page: PageRequest,
    ) -> Result<AppointmentPage, AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::ValidationFailed("User id cannot be empty".to_string()));
        }
        filter.participant = Some(user_id.to_string());
        self.list(filter, page).await
    }

    pub async fn list_for_property(
        &self,
        property_id: &str,
        mut filter: AppointmentFilter,
        page: PageRequest,
    ) -> Result<AppointmentPage, AppError> {
        if property_id.trim().is_empty() {
            return Err(AppError::ValidationFailed("Property id cannot be empty".to_string()));
        }
        filter.property_id = Some(property_id.to_string());
        self.list(filter, page).await
    }

    async fn list(
        &self,
        filter: AppointmentFilter,
        page: PageRequest,
    ) -> Result<AppointmentPage, AppError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(AppError::ValidationFailed(
                    "Range start must not be after its end".to_string(),
                ));
            }
        }
        let (appointments, total) = self.store.list(&filter, page).await?;
        Ok(AppointmentPage {
            appointments,
            total,
            page,
        })
    }

    /// Distribution of appointments scheduled inside the period ending now.
    pub async fn stats(
        &self,
        user_id: Option<&str>,
        period: StatsPeriod,
    ) -> Result<AppointmentStats, AppError> {
        let end = self.clock.now();
        let start = period.start(end);
        let filter = AppointmentFilter {
            participant: user_id.filter(|u| !u.trim().is_empty()).map(str::to_string),
            from: Some(start),
            to: Some(end),
            ..Default::default()
        };
        let appointments = self.store.find_all(&filter).await?;
        let total = appointments.len() as u64;

        let mut by_status: Vec<Share<AppointmentStatus>> = AppointmentStatus::ALL
            .into_iter()
            .map(|status| {
                let count = appointments.iter().filter(|a| a.status == status).count() as u64;
                Share {
                    key: status,
                    count,
                    percentage: percentage(count, total),
                }
            })
            .filter(|share| share.count > 0)
            .collect();
        by_status.sort_by(|a, b| b.count.cmp(&a.count));

        let by_weekday = WEEK
            .into_iter()
            .map(|day| {
                let count = appointments
                    .iter()
                    .filter(|a| a.scheduled_at.with_timezone(&self.policy.utc_offset).weekday() == day)
                    .count() as u64;
                Share {
                    key: day,
                    count,
                    percentage: percentage(count, total),
                }
            })
            .filter(|share| share.count > 0)
            .collect();

        Ok(AppointmentStats {
            total,
            period,
            by_status,
            by_weekday,
            start,
            end,
        })
    }

    /// Mark due reminders as sent and publish `APPOINTMENT_REMINDER_DUE` for
    /// each. A reminder whose publish fails is unmarked and retried on the
    /// next sweep.
    pub async fn send_due_reminders(&self) -> Result<ReminderSweep, AppError> {
        let due = self.store.due_reminders(self.clock.now()).await?;
        let mut sweep = ReminderSweep {
            due: due.len(),
            ..Default::default()
        };

        for appointment in due {
            let id = &appointment.appointment_id;
            if !self.store.mark_reminder_sent(id, true).await? {
                continue;
            }
            match self
                .publish(&appointment, APPOINTMENT_REMINDER_DUE, SYSTEM_ACTOR)
                .await
            {
                Ok(()) => sweep.sent += 1,
                Err(e) => {
                    tracing::warn!(appointment_id = %id, error = %e, "Reminder publish failed");
                    self.store.mark_reminder_sent(id, false).await?;
                    sweep.failed += 1;
                }
            }
        }

        if sweep.due > 0 {
            tracing::info!(due = sweep.due, sent = sweep.sent, failed = sweep.failed, "Reminder sweep finished");
        }
        Ok(sweep)
    }

    /// Publish every appointment's leftover outbox events.
    pub async fn publish_pending_events(&self) -> Result<OutboxSweep, AppError> {
        let pending = self.store.with_pending_events().await?;
        let mut sweep = OutboxSweep {
            pending: pending.len(),
            ..Default::default()
        };

        for mut appointment in pending {
            match self.flush(&mut appointment).await {
                Ok(()) => sweep.flushed += 1,
                Err(e) => {
                    tracing::warn!(
                        appointment_id = %appointment.appointment_id,
                        error = %e,
                        "Pending events still unpublished"
                    );
                    sweep.failed += 1;
                }
            }
        }

        if sweep.pending > 0 {
            tracing::info!(
                pending = sweep.pending,
                flushed = sweep.flushed,
                failed = sweep.failed,
                "Outbox sweep finished"
            );
        }
        Ok(sweep)
    }

    /// Publish the outbox oldest first, dropping each event once the broker
    /// acknowledged it. Stops at the first failure so no event overtakes an
    /// earlier one of the same appointment.
    async fn flush(&self, appointment: &mut Appointment) -> Result<(), AppError> {
        while let Some(pending) = appointment.outbox.first().cloned() {
            self.producer
                .publish_with_id(
                    APPOINTMENT_EVENTS,
                    &appointment.appointment_id,
                    &pending.event_id,
                    &pending.event_type,
                    &pending.snapshot,
                )
                .await?;
            self.store
                .clear_pending_event(&appointment.appointment_id, &pending.event_id)
                .await?;
            appointment.outbox.remove(0);
        }
        Ok(())
    }

    async fn publish(
        &self,
        appointment: &Appointment,
        event_type: &str,
        actor_id: &str,
    ) -> Result<(), AppError> {
        self.producer
            .publish(
                APPOINTMENT_EVENTS,
                &appointment.appointment_id,
                event_type,
                &appointment.snapshot(actor_id),
            )
            .await
            .map(|_| ())
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sunday",
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
    }
}

fn percentage(count: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as u32
}

fn actor_or_system(actor_id: &str) -> &str {
    if actor_id.trim().is_empty() {
        SYSTEM_ACTOR
    } else {
        actor_id
    }
}

fn or_sentinel(value: &str, sentinel: &str, field: &'static str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        tracing::warn!(field, sentinel, "Missing booking field replaced with placeholder");
        sentinel.to_string()
    } else {
        trimmed.to_string()
    }
}

fn invalid_transition(id: &str, from: AppointmentStatus, to: AppointmentStatus) -> AppError {
    AppError::InvalidTransition(format!(
        "Appointment {} cannot move from {} to {}",
        id, from, to
    ))
}

//! Appointment persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, Feedback, PageRequest, PendingEvent,
    ScheduleUpdate, StatusUpdate, DEFAULT_AGENT,
};

/// Storage for appointments. Implementations serialize conflict check and
/// write per agent, so two overlapping active bookings of one agent never
/// both succeed.
///
/// Every write that changes what consumers know about an appointment also
/// appends the describing event to the record's outbox, in the same write.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Insert unless an active appointment of the same agent overlaps
    /// `[scheduled_at, ends_at)`; the overlap is `ScheduleConflict`.
    async fn insert_if_free(&self, appointment: &Appointment) -> Result<(), AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Appointment>, AppError>;

    /// Apply a status change only if the stored status is still
    /// `update.expected`. `None` when it is not (or the id is unknown).
    /// The event lands in the outbox.
    async fn update_status(
        &self,
        id: &str,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError>;

    /// Store feedback on a completed appointment. `None` when the appointment
    /// is missing or no longer completed.
    async fn set_feedback(
        &self,
        id: &str,
        feedback: &Feedback,
        event: &PendingEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError>;

    /// Move an appointment to a new slot. `ScheduleConflict` when another
    /// active appointment of the agent overlaps it; `None` when status or
    /// start no longer match the update's expectations.
    async fn reschedule_if_free(
        &self,
        id: &str,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError>;

    /// Drop a published event from the outbox. Unknown ids are ignored.
    async fn clear_pending_event(&self, id: &str, event_id: &str) -> Result<(), AppError>;

    /// Appointments with a non-empty outbox.
    async fn with_pending_events(&self) -> Result<Vec<Appointment>, AppError>;

    /// Matching appointments ordered by `scheduled_at`, plus the total count.
    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Appointment>, u64), AppError>;

    /// Every matching appointment, unpaged.
    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppError>;

    /// Confirmed appointments whose reminder is due and not yet sent.
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, AppError>;

    /// Set `reminder_sent` to `sent` if it currently holds the opposite value.
    async fn mark_reminder_sent(&self, id: &str, sent: bool) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// Agents whose calendar is checked for overlaps. The placeholder agent is
/// shared by every unassigned booking and is never a real calendar.
pub fn has_calendar(agent_user_id: &str) -> bool {
    agent_user_id != DEFAULT_AGENT
}

fn conflict(agent: &str, existing: &Appointment) -> AppError {
    AppError::ScheduleConflict(format!(
        "Agent {} already has appointment {} from {} to {}",
        agent, existing.appointment_id, existing.scheduled_at, existing.ends_at
    ))
}

/// Process-local store; one lock makes check-and-write atomic.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: Mutex<HashMap<String, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert_if_free(&self, appointment: &Appointment) -> Result<(), AppError> {
        let mut appointments = self.appointments.lock().await;

        if has_calendar(&appointment.agent_user_id) {
            if let Some(existing) = appointments.values().find(|a| {
                a.agent_user_id == appointment.agent_user_id
                    && a.status.is_active()
                    && a.overlaps(appointment.scheduled_at, appointment.ends_at)
            }) {
                return Err(conflict(&appointment.agent_user_id, existing));
            }
        }

        appointments.insert(appointment.appointment_id.clone(), appointment.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Appointment>, AppError> {
        Ok(self.appointments.lock().await.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let mut appointments = self.appointments.lock().await;
        let Some(appointment) = appointments.get_mut(id) else {
            return Ok(None);
        };
        if appointment.status != update.expected {
            return Ok(None);
        }

        appointment.status = update.change.status;
        appointment.history.push(update.change.clone());
        appointment.outbox.push(update.event.clone());
        appointment.updated_utc = now;
        Ok(Some(appointment.clone()))
    }

    async fn set_feedback(
        &self,
        id: &str,
        feedback: &Feedback,
        event: &PendingEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let mut appointments = self.appointments.lock().await;
        match appointments.get_mut(id) {
            Some(appointment) if appointment.status == AppointmentStatus::Completed => {
                appointment.feedback = Some(feedback.clone());
                appointment.outbox.push(event.clone());
                appointment.updated_utc = now;
                Ok(Some(appointment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reschedule_if_free(
        &self,
        id: &str,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppError> {
        let mut appointments = self.appointments.lock().await;
        let Some(current) = appointments.get(id) else {
            return Ok(None);
        };
        if current.status != update.expected_status || current.scheduled_at != update.expected_start {
            return Ok(None);
        }

        let agent = current.agent_user_id.clone();
        if has_calendar(&agent) {
            if let Some(existing) = appointments.values().find(|a| {
                a.appointment_id != id
                    && a.agent_user_id == agent
                    && a.status.is_active()
                    && a.overlaps(update.scheduled_at, update.ends_at)
            }) {
                return Err(conflict(&agent, existing));
            }
        }

        let Some(appointment) = appointments.get_mut(id) else {
            return Ok(None);
        };
        appointment.scheduled_at = update.scheduled_at;
        appointment.ends_at = update.ends_at;
        appointment.reminder_at = update.reminder_at;
        appointment.reminder_sent = false;
        appointment.outbox.push(update.event.clone());
        appointment.updated_utc = now;
        Ok(Some(appointment.clone()))
    }

    async fn clear_pending_event(&self, id: &str, event_id: &str) -> Result<(), AppError> {
        if let Some(appointment) = self.appointments.lock().await.get_mut(id) {
            appointment.outbox.retain(|e| e.event_id != event_id);
        }
        Ok(())
    }

    async fn with_pending_events(&self) -> Result<Vec<Appointment>, AppError> {
        let appointments = self.appointments.lock().await;
        Ok(appointments
            .values()
            .filter(|a| !a.outbox.is_empty())
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
        page: PageRequest,
    ) -> Result<(Vec<Appointment>, u64), AppError> {
        let matching = self.find_all(filter).await?;
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.skip() as usize)
            .take(page.limit as usize)
            .collect();
        Ok((items, total))
    }

    async fn find_all(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppError> {
        let appointments = self.appointments.lock().await;
        let mut matching: Vec<Appointment> = appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.appointment_id.cmp(&b.appointment_id))
        });
        Ok(matching)
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>, AppError> {
        let appointments = self.appointments.lock().await;
        Ok(appointments
            .values()
            .filter(|a| {
                a.status == AppointmentStatus::Confirmed
                    && !a.reminder_sent
                    && a.reminder_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    async fn mark_reminder_sent(&self, id: &str, sent: bool) -> Result<bool, AppError> {
        let mut appointments = self.appointments.lock().await;
        match appointments.get_mut(id) {
            Some(appointment) if appointment.reminder_sent != sent => {
                appointment.reminder_sent = sent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

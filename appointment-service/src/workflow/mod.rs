//! Booking rules and the appointment state machine.

pub mod engine;
pub mod schedule;

pub use engine::{
    weekday_name, AppointmentStats, AppointmentWorkflow, BookingRequest, FeedbackRequest,
    OutboxSweep, ReminderSweep, RescheduleRequest, Share, StatsPeriod, Transition, SYSTEM_ACTOR,
};
pub use schedule::{Clock, FixedClock, SchedulePolicy, SystemClock};

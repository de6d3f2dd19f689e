pub mod database;
pub mod store;

pub use database::AppointmentDb;
pub use store::{has_calendar, AppointmentStore, InMemoryAppointmentStore};

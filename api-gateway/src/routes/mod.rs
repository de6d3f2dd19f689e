pub mod health;
pub mod query;

pub use health::{health_check, metrics_endpoint};
pub use query::{query, GatewayState};

//! Shared infrastructure for the proptech services.
//!
//! - [`grpc`]: client directory, resilient RPC adapter and typed clients for
//!   the user, property and appointment contracts
//! - [`events`]: keyed, at-least-once event bus over Redis streams or memory
//! - [`error`]: the error taxonomy shared across HTTP, gRPC and the bus
//! - [`config`], [`observability`], [`middleware`]: the ambient stack every
//!   service binary starts with

pub mod config;
pub mod error;
pub mod events;
pub mod grpc;
pub mod middleware;
pub mod observability;

pub use error::AppError;
pub use events::{DomainEvent, EventBroker, EventProducer};
pub use grpc::{ClientDirectory, RpcAdapter, RpcAdapterConfig};

pub use async_trait;
pub use tonic;

//! gRPC utilities shared by proptech services.
//!
//! - Error conversion between `AppError` and `tonic::Status`
//! - Trace context propagation for outgoing calls
//! - Client directory resolving logical service names
//! - Resilient RPC adapter and the typed clients built on it

pub mod adapter;
pub mod appointment_client;
pub mod directory;
pub mod error;
pub mod interceptors;
pub mod property_client;
pub mod retry;
pub mod user_client;

// Include the generated proto code for clients
pub mod proto {
    pub mod user {
        tonic::include_proto!("proptech.user.v1");
    }
    pub mod property {
        tonic::include_proto!("proptech.property.v1");
    }
    pub mod appointment {
        tonic::include_proto!("proptech.appointment.v1");
    }
}

pub use adapter::{RpcAdapter, RpcAdapterConfig};
pub use appointment_client::{AppointmentClient, Transition};
pub use directory::{ClientDirectory, LogicalService, ServiceEndpoint};
pub use error::{ERROR_KIND_KEY, GrpcResult, IntoStatus};
pub use interceptors::{
    RequestId, current_request_id, inject_trace_context, trace_context_interceptor,
    with_request_id,
};
pub use property_client::{PropertyClient, PropertyPage, PropertySearch, PropertySummary};
pub use retry::{RetryConfig, call_with_retry, is_retryable};
pub use user_client::{UserClient, UserRef};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};

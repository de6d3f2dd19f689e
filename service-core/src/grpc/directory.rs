//! Logical service name to endpoint resolution.
//!
//! Resolution order: environment override, then static default, then
//! `NotConfigured`. The directory is built once at process start and shared
//! read-only behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalService {
    User,
    Property,
    Appointment,
    Chat,
    Notification,
}

impl LogicalService {
    pub const ALL: [LogicalService; 5] = [
        LogicalService::User,
        LogicalService::Property,
        LogicalService::Appointment,
        LogicalService::Chat,
        LogicalService::Notification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogicalService::User => "user",
            LogicalService::Property => "property",
            LogicalService::Appointment => "appointment",
            LogicalService::Chat => "chat",
            LogicalService::Notification => "notification",
        }
    }

    /// Environment variable that overrides the default address.
    pub fn env_key(&self) -> &'static str {
        match self {
            LogicalService::User => "USER_SERVICE_URL",
            LogicalService::Property => "PROPERTY_SERVICE_URL",
            LogicalService::Appointment => "APPOINTMENT_SERVICE_URL",
            LogicalService::Chat => "CHAT_SERVICE_URL",
            LogicalService::Notification => "NOTIFICATION_SERVICE_URL",
        }
    }

    pub fn default_address(&self) -> Option<&'static str> {
        match self {
            LogicalService::User => Some("http://localhost:50052"),
            LogicalService::Property => Some("http://localhost:50051"),
            LogicalService::Appointment => Some("http://localhost:50053"),
            LogicalService::Chat | LogicalService::Notification => None,
        }
    }

    /// Fully-qualified gRPC service implemented at the endpoint. Chat only
    /// serves the standard health service.
    pub fn contract(&self) -> &'static str {
        match self {
            LogicalService::User => "proptech.user.v1.UserService",
            LogicalService::Property => "proptech.property.v1.PropertyService",
            LogicalService::Appointment => "proptech.appointment.v1.AppointmentService",
            LogicalService::Chat => "grpc.health.v1.Health",
            LogicalService::Notification => "proptech.notification.v1.NotificationService",
        }
    }
}

impl fmt::Display for LogicalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogicalService {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogicalService::ALL
            .into_iter()
            .find(|svc| svc.name() == s)
            .ok_or_else(|| AppError::NotConfigured(format!("unknown logical service '{}'", s)))
    }
}

/// A resolved service address. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub logical_name: &'static str,
    pub address: String,
    pub contract: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ClientDirectory {
    endpoints: HashMap<LogicalService, ServiceEndpoint>,
}

impl ClientDirectory {
    /// Build the directory from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the directory from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut endpoints = HashMap::new();
        for service in LogicalService::ALL {
            let address = lookup(service.env_key())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| service.default_address().map(str::to_string));

            if let Some(address) = address {
                endpoints.insert(
                    service,
                    ServiceEndpoint {
                        logical_name: service.name(),
                        address,
                        contract: service.contract(),
                    },
                );
            }
        }

        tracing::info!(
            services = ?endpoints.values().map(|e| (e.logical_name, e.address.as_str())).collect::<Vec<_>>(),
            "Client directory initialized"
        );

        Self { endpoints }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn resolve(&self, service: LogicalService) -> Result<ServiceEndpoint, AppError> {
        self.endpoints.get(&service).cloned().ok_or_else(|| {
            AppError::NotConfigured(format!(
                "no endpoint for '{}' (set {})",
                service,
                service.env_key()
            ))
        })
    }

    pub fn resolve_name(&self, logical_name: &str) -> Result<ServiceEndpoint, AppError> {
        self.resolve(logical_name.parse()?)
    }
}

//! Application startup and lifecycle management.
//!
//! The HTTP listener serves health, readiness and metrics; bookings and
//! state changes are exposed over gRPC.

use crate::config::{AppointmentConfig, StorageBackend};
use crate::grpc::{
    proto::{appointment_service_server::AppointmentServiceServer, FILE_DESCRIPTOR_SET},
    AppointmentGrpcService,
};
use crate::migrations::migrate_to_v1;
use crate::services::{AppointmentDb, AppointmentStore, InMemoryAppointmentStore};
use crate::workers::ReminderWorker;
use crate::workflow::{AppointmentWorkflow, SystemClock};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use service_core::error::AppError;
use service_core::events::{connect_broker, EventBroker, EventProducer, ProducerConfig};
use service_core::grpc::trace_context_interceptor;
use service_core::observability::get_metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as GrpcServer;

const SERVICE_NAME: &str = "appointment-service";

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn AppointmentStore>,
    broker: Arc<dyn EventBroker>,
}

impl HealthState {
    async fn check(&self) -> Result<(), String> {
        self.store.health_check().await.map_err(|e| e.to_string())?;
        self.broker.health_check().await.map_err(|e| e.to_string())
    }
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": SERVICE_NAME,
                "error": e
            })),
        ),
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.check().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    config: AppointmentConfig,
    workflow: Arc<AppointmentWorkflow>,
    broker: Arc<dyn EventBroker>,
}

impl Application {
    /// Connect the configured store and broker, then bind both listeners.
    pub async fn build(config: AppointmentConfig) -> Result<Self, AppError> {
        let store: Arc<dyn AppointmentStore> = match config.storage {
            StorageBackend::MongoDb => {
                let db = AppointmentDb::connect(&config.mongodb.uri, &config.mongodb.database)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to connect to MongoDB: {}", e);
                        e
                    })?;
                db.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;
                migrate_to_v1(&db).await?;
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory appointment store; data is lost on restart");
                Arc::new(InMemoryAppointmentStore::new())
            }
        };

        let broker =
            connect_broker(&config.event_bus.backend, config.event_bus.partitions).await?;

        Self::build_with(config, store, broker).await
    }

    /// Bind the listeners around an already constructed store and broker.
    pub async fn build_with(
        config: AppointmentConfig,
        store: Arc<dyn AppointmentStore>,
        broker: Arc<dyn EventBroker>,
    ) -> Result<Self, AppError> {
        let policy = config.schedule.policy()?;
        let producer = EventProducer::new(broker.clone(), ProducerConfig::default());
        let workflow = Arc::new(AppointmentWorkflow::new(
            store,
            producer,
            policy,
            Arc::new(SystemClock),
        ));

        // Bind HTTP listener (port 0 = random port for testing)
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", http_addr, e);
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!("Failed to bind gRPC listener to {}: {}", grpc_addr, e);
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            "Appointment service: HTTP on port {}, gRPC on port {}",
            http_port,
            grpc_port
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            config,
            workflow,
            broker,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn workflow(&self) -> Arc<AppointmentWorkflow> {
        self.workflow.clone()
    }

    /// Run the HTTP and gRPC servers and the reminder worker until one of
    /// the servers stops.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`Self::run_until_stopped`], also returning once `signal`
    /// completes.
    pub async fn run_until<F>(self, signal: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let shutdown = CancellationToken::new();
        let reminders = ReminderWorker::new(
            self.workflow.clone(),
            self.config.reminder_interval,
            &shutdown,
        )
        .start();

        let health_state = HealthState {
            store: self.workflow.store().clone(),
            broker: self.broker.clone(),
        };
        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_endpoint))
            .with_state(health_state);

        let appointment_service = AppointmentGrpcService::new(self.workflow.clone());

        // gRPC health service
        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<AppointmentServiceServer<AppointmentGrpcService>>()
            .await;

        // Reflection service for debugging
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(tonic::service::interceptor(trace_context_interceptor))
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(AppointmentServiceServer::new(appointment_service))
            .serve_with_incoming(incoming);

        // Run both servers concurrently
        let result = tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                result.map_err(|e| {
                    tracing::error!("HTTP server error: {}", e);
                    std::io::Error::other(format!("HTTP server error: {}", e))
                })
            }
            result = grpc_server => {
                result.map_err(|e| {
                    tracing::error!("gRPC server error: {}", e);
                    std::io::Error::other(format!("gRPC server error: {}", e))
                })
            }
            _ = signal => Ok(()),
        };

        shutdown.cancel();
        let _ = reminders.await;
        result
    }
}

//! Application startup and lifecycle management.
//!
//! Runs the event consumer next to HTTP health/metrics endpoints and a gRPC
//! health service.

use crate::config::{ChatConfig, StorageBackend};
use crate::handlers::ChatEventHandler;
use crate::services::{ChatDb, ChatStore, InMemoryChatStore};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use service_core::error::AppError;
use service_core::events::{
    connect_broker, ConsumerConfig, EventBroker, EventConsumer, APPOINTMENT_EVENTS, PROPERTY_EVENTS,
};
use service_core::grpc::{ClientDirectory, UserClient};
use service_core::observability::get_metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as GrpcServer;

const SERVICE_NAME: &str = "chat-service";

#[derive(Clone)]
struct HealthState {
    store: Arc<dyn ChatStore>,
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

pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    config: ChatConfig,
    store: Arc<dyn ChatStore>,
    broker: Arc<dyn EventBroker>,
    users: UserClient,
}

impl Application {
    pub async fn build(config: ChatConfig) -> Result<Self, AppError> {
        let store: Arc<dyn ChatStore> = match config.storage {
            StorageBackend::MongoDb => {
                let db = ChatDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
                db.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory chat store; data is lost on restart");
                Arc::new(InMemoryChatStore::new())
            }
        };
        let broker =
            connect_broker(&config.event_bus.backend, config.event_bus.partitions).await?;
        let users = UserClient::new(&ClientDirectory::from_env(), &config.rpc)?;

        Self::build_with(config, store, broker, users).await
    }

    pub async fn build_with(
        config: ChatConfig,
        store: Arc<dyn ChatStore>,
        broker: Arc<dyn EventBroker>,
        users: UserClient,
    ) -> Result<Self, AppError> {
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
            "Chat service: HTTP on port {}, gRPC on port {}",
            http_port,
            grpc_port
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            config,
            store,
            broker,
            users,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn store(&self) -> Arc<dyn ChatStore> {
        self.store.clone()
    }

    /// Consume events and serve health endpoints until a server stops.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`Self::run_until_stopped`], also returning once `signal`
    /// completes. In-flight events finish before this returns.
    pub async fn run_until<F>(self, signal: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let shutdown = CancellationToken::new();
        let consumer = EventConsumer::new(
            self.broker.clone(),
            ConsumerConfig::new(
                &self.config.event_bus.consumer_group,
                &[PROPERTY_EVENTS, APPOINTMENT_EVENTS],
            ),
        );
        let handler = Arc::new(ChatEventHandler::new(self.store.clone(), self.users.clone()));
        let consumer_handle = consumer.spawn(handler, &shutdown);
        tracing::info!(
            group = %self.config.event_bus.consumer_group,
            "Chat consumer started"
        );

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_endpoint))
            .with_state(HealthState {
                store: self.store.clone(),
                broker: self.broker.clone(),
            });

        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_service_status(SERVICE_NAME, tonic_health::ServingStatus::Serving)
            .await;

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .add_service(grpc_health_service)
            .serve_with_incoming(incoming);

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

        consumer_handle.shutdown().await;
        result
    }
}

//! Cross-service workflow integration tests library.
//!
//! Starts the gateway, the appointment service and the chat service in one
//! process over a shared in-memory event bus, with a stand-in user service.
//! Property lookups point at an address nobody listens on, so every
//! property enrichment exercises its fallback.

use anyhow::{anyhow, Result};
use api_gateway::config::GatewayConfig;
use api_gateway::resolvers::Resolver;
use api_gateway::routes::query::QueryResponse;
use appointment_service::config::AppointmentConfig;
use appointment_service::services::InMemoryAppointmentStore;
use chat_service::config::ChatConfig;
use chat_service::services::{ChatStore, InMemoryChatStore};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use service_core::events::{EventProducer, InMemoryBroker, ProducerConfig};
use service_core::grpc::proto::user::user_service_server::{UserService, UserServiceServer};
use service_core::grpc::proto::user::{
    GetUserRequest, GetUserResponse, GetUsersRequest, GetUsersResponse, User,
};
use service_core::grpc::{ClientDirectory, RetryConfig, RpcAdapterConfig, UserClient};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::{Request, Response, Status};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn,workflow_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Nothing listens here.
pub const UNREACHABLE: &str = "http://127.0.0.1:1";

struct DirectoryUsers(HashMap<String, User>);

#[tonic::async_trait]
impl UserService for DirectoryUsers {
    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let id = request.into_inner().id;
        self.0
            .get(&id)
            .map(|user| {
                Response::new(GetUserResponse {
                    user: Some(user.clone()),
                })
            })
            .ok_or_else(|| Status::not_found(format!("user {} not found", id)))
    }

    async fn get_users(
        &self,
        _request: Request<GetUsersRequest>,
    ) -> Result<Response<GetUsersResponse>, Status> {
        Ok(Response::new(GetUsersResponse {
            users: self.0.values().cloned().collect(),
        }))
    }
}

/// Serve a user directory of `(id, name, role)` on an ephemeral port.
pub async fn spawn_user_service(users: &[(&str, &str, &str)]) -> Result<String> {
    let users = users
        .iter()
        .map(|(id, name, role)| {
            let user = User {
                id: id.to_string(),
                name: name.to_string(),
                email: format!("{}@example.com", id),
                role: role.to_string(),
            };
            (id.to_string(), user)
        })
        .collect();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(UserServiceServer::new(DirectoryUsers(users)))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .ok();
    });
    Ok(address)
}

fn rpc_config() -> RpcAdapterConfig {
    RpcAdapterConfig {
        connect_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(1000),
        retry: RetryConfig::no_retry(),
    }
}

/// All services of one test, wired together.
pub struct WorkflowStack {
    pub gateway_address: String,
    pub appointment_grpc_address: String,
    pub chat_store: Arc<dyn ChatStore>,
    pub broker: Arc<InMemoryBroker>,
    /// Publishes as the property service would.
    pub producer: EventProducer,
    pub http: reqwest::Client,
}

impl WorkflowStack {
    /// Start every service; `user_service` is the user directory address.
    pub async fn start(user_service: &str) -> Result<Self> {
        init_tracing();
        let broker = Arc::new(InMemoryBroker::new(4));

        let appointments = appointment_service::startup::Application::build_with(
            AppointmentConfig::in_memory(),
            Arc::new(InMemoryAppointmentStore::new()),
            broker.clone(),
        )
        .await?;
        let appointment_grpc_address = format!("http://127.0.0.1:{}", appointments.grpc_port());
        let appointment_health = format!("http://127.0.0.1:{}/health", appointments.http_port());
        tokio::spawn(appointments.run_until_stopped());

        let users_address = user_service.to_string();
        let appointment_address = appointment_grpc_address.clone();
        let directory = ClientDirectory::from_lookup(move |key| match key {
            "USER_SERVICE_URL" => Some(users_address.clone()),
            "PROPERTY_SERVICE_URL" => Some(UNREACHABLE.to_string()),
            "APPOINTMENT_SERVICE_URL" => Some(appointment_address.clone()),
            _ => None,
        });

        let chat = chat_service::startup::Application::build_with(
            ChatConfig::in_memory(),
            Arc::new(InMemoryChatStore::new()),
            broker.clone(),
            UserClient::new(&directory, &rpc_config())?,
        )
        .await?;
        let chat_store = chat.store();
        let chat_health = format!("http://127.0.0.1:{}/health", chat.http_port());
        tokio::spawn(chat.run_until_stopped());

        let gateway = api_gateway::startup::Application::build_with(
            GatewayConfig::default(),
            Resolver::from_directory(&directory, &rpc_config())?,
        )
        .await?;
        let gateway_address = format!("http://127.0.0.1:{}", gateway.port());
        let gateway_health = format!("{}/health", gateway_address);
        tokio::spawn(gateway.run_until_stopped());

        let http = reqwest::Client::new();
        wait_for_health(
            &http,
            &[appointment_health, chat_health, gateway_health],
            Duration::from_secs(5),
        )
        .await?;

        Ok(Self {
            gateway_address,
            appointment_grpc_address,
            chat_store,
            producer: EventProducer::new(broker.clone(), ProducerConfig::default()),
            broker,
            http,
        })
    }

    /// POST a query to the gateway as `user_id`.
    pub async fn query(&self, body: Value, user_id: Option<&str>) -> Result<QueryResponse> {
        let mut request = self
            .http
            .post(format!("{}/api/query", self.gateway_address))
            .json(&body);
        if let Some(user_id) = user_id {
            request = request.header("x-user-id", user_id);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Gateway answered {}", response.status()));
        }
        Ok(response.json().await?)
    }
}

/// Poll health endpoints until all answer 200 OK.
pub async fn wait_for_health(
    http: &reqwest::Client,
    urls: &[String],
    timeout: Duration,
) -> Result<()> {
    let start = std::time::Instant::now();
    loop {
        let mut unhealthy = Vec::new();
        for url in urls {
            match http.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => unhealthy.push(format!("{} ({})", url, resp.status())),
                Err(e) => unhealthy.push(format!("{} ({})", url, e)),
            }
        }
        if unhealthy.is_empty() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            return Err(anyhow!("Unhealthy: {}", unhealthy.join(", ")));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll `check` until it holds, giving up after `timeout`.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

/// The next Monday strictly after today, at `hour` UTC.
pub fn next_monday_at(hour: u32) -> DateTime<Utc> {
    let today = Utc::now().date_naive();
    let days_ahead = 7 - i64::from(today.weekday().num_days_from_monday());
    let monday = today + ChronoDuration::days(days_ahead);
    Utc.from_utc_datetime(&monday.and_hms_opt(hour, 0, 0).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn next_monday_is_in_the_future() {
        let monday = next_monday_at(10);
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert!(monday > Utc::now());
        assert!(monday - Utc::now() <= ChronoDuration::days(8));
    }
}

use appointment_service::config::AppointmentConfig;
use appointment_service::services::InMemoryAppointmentStore;
use appointment_service::startup::Application;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use prost_types::Timestamp;
use service_core::events::InMemoryBroker;
use service_core::grpc::proto::appointment::CreateAppointmentRequest;
use service_core::grpc::{AppointmentClient, ClientDirectory, RpcAdapterConfig};
use std::sync::Arc;

pub struct TestApp {
    pub http_address: String,
    pub grpc_address: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub broker: Arc<InMemoryBroker>,
    pub client: AppointmentClient,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let broker = Arc::new(InMemoryBroker::new(4));
        let app = Application::build_with(
            AppointmentConfig::in_memory(),
            Arc::new(InMemoryAppointmentStore::new()),
            broker.clone(),
        )
        .await
        .expect("Failed to build test application");

        let http_port = app.http_port();
        let grpc_port = app.grpc_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);
        let grpc_address = format!("http://127.0.0.1:{}", grpc_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let http = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if http.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        // Additional wait for gRPC server
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let target = grpc_address.clone();
        let directory = ClientDirectory::from_lookup(move |key| {
            (key == "APPOINTMENT_SERVICE_URL").then(|| target.clone())
        });
        let client = AppointmentClient::new(&directory, &RpcAdapterConfig::default())
            .expect("Failed to build appointment client");

        TestApp {
            http_address,
            grpc_address,
            http_port,
            grpc_port,
            broker,
            client,
        }
    }
}

/// The next Monday strictly after today, at the given UTC hour.
pub fn next_monday_at(hour: u32) -> DateTime<Utc> {
    let today = Utc::now().date_naive();
    let days_ahead = 7 - i64::from(today.weekday().num_days_from_monday());
    let monday = today + Duration::days(days_ahead);
    Utc.from_utc_datetime(&monday.and_hms_opt(hour, 0, 0).unwrap())
}

pub fn timestamp(at: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: 0,
    }
}

pub fn booking(at: DateTime<Utc>) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        property_id: "P1".to_string(),
        requester_user_id: "U1".to_string(),
        agent_user_id: "U2".to_string(),
        scheduled_at: Some(timestamp(at)),
        duration_minutes: 60,
        ..Default::default()
    }
}

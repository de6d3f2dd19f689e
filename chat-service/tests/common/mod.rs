use chat_service::config::ChatConfig;
use chat_service::services::{ChatStore, InMemoryChatStore};
use chat_service::startup::Application;
use service_core::events::{EventProducer, InMemoryBroker, ProducerConfig};
use service_core::grpc::proto::user::user_service_server::{UserService, UserServiceServer};
use service_core::grpc::proto::user::{
    GetUserRequest, GetUserResponse, GetUsersRequest, GetUsersResponse, User,
};
use service_core::grpc::{ClientDirectory, RpcAdapterConfig, UserClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::{Request, Response, Status};

/// In-process stand-in for the user service.
pub struct FakeUsers {
    users: HashMap<String, User>,
}

#[tonic::async_trait]
impl UserService for FakeUsers {
    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let id = request.into_inner().id;
        match self.users.get(&id) {
            Some(user) => Ok(Response::new(GetUserResponse {
                user: Some(user.clone()),
            })),
            None => Err(Status::not_found(format!("user {} not found", id))),
        }
    }

    async fn get_users(
        &self,
        _request: Request<GetUsersRequest>,
    ) -> Result<Response<GetUsersResponse>, Status> {
        Ok(Response::new(GetUsersResponse {
            users: self.users.values().cloned().collect(),
        }))
    }
}

/// Serve `users` on an ephemeral port and return its address.
pub async fn spawn_user_service(users: &[(&str, &str, &str)]) -> String {
    let fake = FakeUsers {
        users: users
            .iter()
            .map(|(id, name, role)| {
                (
                    id.to_string(),
                    User {
                        id: id.to_string(),
                        name: name.to_string(),
                        email: format!("{}@example.com", id),
                        role: role.to_string(),
                    },
                )
            })
            .collect(),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(UserServiceServer::new(fake))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .ok();
    });
    address
}

pub struct TestApp {
    pub http_address: String,
    pub store: Arc<dyn ChatStore>,
    pub broker: Arc<InMemoryBroker>,
    pub producer: EventProducer,
}

impl TestApp {
    pub async fn spawn(user_service_address: &str) -> Self {
        let broker = Arc::new(InMemoryBroker::new(4));
        let address = user_service_address.to_string();
        let directory = ClientDirectory::from_lookup(move |key| {
            (key == "USER_SERVICE_URL").then(|| address.clone())
        });
        let rpc = RpcAdapterConfig {
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let users = UserClient::new(&directory, &rpc).expect("Failed to build user client");

        let app = Application::build_with(
            ChatConfig::in_memory(),
            Arc::new(InMemoryChatStore::new()),
            broker.clone(),
            users,
        )
        .await
        .expect("Failed to build test application");

        let http_address = format!("http://127.0.0.1:{}", app.http_port());
        let store = app.store();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            store,
            producer: EventProducer::new(broker.clone(), ProducerConfig::default()),
            broker,
        }
    }

    /// Poll until `check` holds or two seconds pass.
    pub async fn eventually<F, Fut>(&self, check: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

#![allow(dead_code)]

use api_gateway::config::GatewayConfig;
use api_gateway::resolvers::Resolver;
use api_gateway::routes::query::QueryResponse;
use api_gateway::startup::Application;
use serde_json::Value;
use service_core::grpc::proto::property::property_service_server::{
    PropertyService, PropertyServiceServer,
};
use service_core::grpc::proto::property::{
    GetPropertyRequest, GetPropertyResponse, Property, SearchPropertiesRequest,
    SearchPropertiesResponse,
};
use service_core::grpc::proto::user::user_service_server::{UserService, UserServiceServer};
use service_core::grpc::proto::user::{
    GetUserRequest, GetUserResponse, GetUsersRequest, GetUsersResponse, User,
};
use service_core::grpc::{ClientDirectory, RetryConfig, RpcAdapterConfig};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::{Request, Response, Status};

/// Nothing listens here.
pub const UNREACHABLE: &str = "http://127.0.0.1:1";

pub struct FakeUsers(pub HashMap<String, User>);

#[tonic::async_trait]
impl UserService for FakeUsers {
    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let id = request.into_inner().id;
        match self.0.get(&id) {
            Some(user) => Ok(Response::new(GetUserResponse {
                user: Some(user.clone()),
            })),
            None => Err(Status::not_found(format!("user {} not found", id))),
        }
    }

    async fn get_users(
        &self,
        request: Request<GetUsersRequest>,
    ) -> Result<Response<GetUsersResponse>, Status> {
        let role = request.into_inner().role;
        let mut users: Vec<User> = self
            .0
            .values()
            .filter(|u| role.is_empty() || u.role == role)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Response::new(GetUsersResponse { users }))
    }
}

pub struct FakeProperties(pub HashMap<String, Property>);

#[tonic::async_trait]
impl PropertyService for FakeProperties {
    async fn get_property(
        &self,
        request: Request<GetPropertyRequest>,
    ) -> Result<Response<GetPropertyResponse>, Status> {
        let id = request.into_inner().id;
        match self.0.get(&id) {
            Some(property) => Ok(Response::new(GetPropertyResponse {
                property: Some(property.clone()),
            })),
            None => Err(Status::not_found(format!("property {} not found", id))),
        }
    }

    async fn search_properties(
        &self,
        _request: Request<SearchPropertiesRequest>,
    ) -> Result<Response<SearchPropertiesResponse>, Status> {
        Ok(Response::new(SearchPropertiesResponse {
            properties: self.0.values().cloned().collect(),
            total_count: self.0.len() as i64,
        }))
    }
}

pub fn user(id: &str, name: &str, role: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", id),
        role: role.to_string(),
    }
}

pub fn property(id: &str, title: &str, owner_id: &str) -> Property {
    Property {
        id: id.to_string(),
        title: title.to_string(),
        owner_id: owner_id.to_string(),
        city: "Lisbon".to_string(),
        price: 350_000.0,
        status: "available".to_string(),
    }
}

async fn serve(router: tonic::transport::server::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        router
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .ok();
    });
    address
}

pub async fn spawn_user_service(users: Vec<User>) -> String {
    let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
    serve(tonic::transport::Server::builder().add_service(UserServiceServer::new(FakeUsers(users))))
        .await
}

pub async fn spawn_property_service(properties: Vec<Property>) -> String {
    let properties = properties.into_iter().map(|p| (p.id.clone(), p)).collect();
    serve(
        tonic::transport::Server::builder()
            .add_service(PropertyServiceServer::new(FakeProperties(properties))),
    )
    .await
}

/// Backend addresses the gateway under test resolves.
pub struct Backends {
    pub user: String,
    pub property: String,
    pub appointment: String,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            user: UNREACHABLE.to_string(),
            property: UNREACHABLE.to_string(),
            appointment: UNREACHABLE.to_string(),
        }
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(backends: Backends) -> Self {
        let directory = ClientDirectory::from_lookup(move |key| match key {
            "USER_SERVICE_URL" => Some(backends.user.clone()),
            "PROPERTY_SERVICE_URL" => Some(backends.property.clone()),
            "APPOINTMENT_SERVICE_URL" => Some(backends.appointment.clone()),
            _ => None,
        });
        let rpc = RpcAdapterConfig {
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
            retry: RetryConfig::no_retry(),
        };
        let resolver =
            Resolver::from_directory(&directory, &rpc).expect("Failed to build resolver");

        let app = Application::build_with(GatewayConfig::default(), resolver)
            .await
            .expect("Failed to build gateway");
        let address = format!("http://127.0.0.1:{}", app.port());
        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        TestApp {
            address,
            client: reqwest::Client::new(),
        }
    }

    pub async fn query(&self, body: Value, user_id: Option<&str>) -> QueryResponse {
        let mut request = self
            .client
            .post(format!("{}/api/query", self.address))
            .json(&body);
        if let Some(user_id) = user_id {
            request = request.header("x-user-id", user_id);
        }
        let response = request.send().await.expect("Failed to execute request");
        assert_eq!(response.status(), 200);
        response.json().await.expect("Invalid query response")
    }
}

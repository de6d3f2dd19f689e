//! User service client.

use serde::Serialize;
use tonic::Request;
use tonic::transport::Channel;

use super::adapter::{RpcAdapter, RpcAdapterConfig};
use super::directory::{ClientDirectory, LogicalService};
use super::interceptors::inject_trace_context;
use super::proto::user::user_service_client::UserServiceClient;
use super::proto::user::{GetUserRequest, GetUserResponse, GetUsersRequest, GetUsersResponse, User};
use crate::error::AppError;

pub const UNKNOWN_USER_NAME: &str = "Unknown user";
pub const DEFAULT_USER_ROLE: &str = "buyer";

/// Best-effort copy of a user record owned by the user service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    pub display_name: String,
    pub role: String,
}

impl UserRef {
    /// Placeholder used when the user service cannot answer.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: UNKNOWN_USER_NAME.to_string(),
            role: DEFAULT_USER_ROLE.to_string(),
        }
    }
}

impl From<User> for UserRef {
    fn from(user: User) -> Self {
        Self {
            display_name: if user.name.is_empty() {
                UNKNOWN_USER_NAME.to_string()
            } else {
                user.name
            },
            role: if user.role.is_empty() {
                DEFAULT_USER_ROLE.to_string()
            } else {
                user.role
            },
            id: user.id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserClient {
    adapter: RpcAdapter,
    client: UserServiceClient<Channel>,
}

impl UserClient {
    pub fn new(directory: &ClientDirectory, config: &RpcAdapterConfig) -> Result<Self, AppError> {
        let endpoint = directory.resolve(LogicalService::User)?;
        Ok(Self::from_adapter(RpcAdapter::new(endpoint, config)?))
    }

    pub fn from_adapter(adapter: RpcAdapter) -> Self {
        let client = UserServiceClient::new(adapter.channel());
        Self { adapter, client }
    }

    pub async fn get_user(&self, id: &str) -> Result<UserRef, AppError> {
        let response = self
            .adapter
            .call("GetUser", || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetUserRequest { id: id.to_string() });
                inject_trace_context(&mut request);
                async move { client.get_user(request).await }
            })
            .await?;

        response
            .user
            .map(UserRef::from)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", id)))
    }

    /// Never fails: an unreachable service or a missing user yields
    /// [`UserRef::unknown`].
    pub async fn get_user_or_default(&self, id: &str) -> UserRef {
        if id.is_empty() {
            return UserRef::unknown(id);
        }

        let response = self
            .adapter
            .call_or_default("GetUser", GetUserResponse { user: None }, || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetUserRequest { id: id.to_string() });
                inject_trace_context(&mut request);
                async move { client.get_user(request).await }
            })
            .await;

        response
            .user
            .map(UserRef::from)
            .unwrap_or_else(|| UserRef::unknown(id))
    }

    /// Users with the given role, or every user when `role` is `None`.
    pub async fn get_users(&self, role: Option<&str>) -> Result<Vec<UserRef>, AppError> {
        let role = role.unwrap_or_default().to_string();
        let response = self
            .adapter
            .call("GetUsers", || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetUsersRequest { role: role.clone() });
                inject_trace_context(&mut request);
                async move { client.get_users(request).await }
            })
            .await?;

        Ok(response.users.into_iter().map(UserRef::from).collect())
    }

    pub async fn get_users_or_empty(&self, role: Option<&str>) -> Vec<UserRef> {
        let role = role.unwrap_or_default().to_string();
        self.adapter
            .call_or_default("GetUsers", GetUsersResponse { users: vec![] }, || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetUsersRequest { role: role.clone() });
                inject_trace_context(&mut request);
                async move { client.get_users(request).await }
            })
            .await
            .users
            .into_iter()
            .map(UserRef::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_conversion_fills_blank_fields() {
        let user = User {
            id: "u1".into(),
            name: String::new(),
            email: "a@b.c".into(),
            role: String::new(),
        };
        let user_ref = UserRef::from(user);
        assert_eq!(user_ref.display_name, UNKNOWN_USER_NAME);
        assert_eq!(user_ref.role, DEFAULT_USER_ROLE);
    }

    #[tokio::test]
    async fn unreachable_service_yields_default_user() {
        let directory = ClientDirectory::from_lookup(|key| {
            (key == "USER_SERVICE_URL").then(|| "http://127.0.0.1:1".to_string())
        });
        let config = RpcAdapterConfig {
            connect_timeout: std::time::Duration::from_millis(100),
            request_timeout: std::time::Duration::from_millis(300),
            retry: super::super::retry::RetryConfig::no_retry(),
        };
        let client = UserClient::new(&directory, &config).unwrap();

        assert_eq!(client.get_user_or_default("u1").await, UserRef::unknown("u1"));
        assert!(client.get_users_or_empty(None).await.is_empty());
        assert!(matches!(
            client.get_user("u1").await,
            Err(AppError::Unreachable(_))
        ));
    }
}

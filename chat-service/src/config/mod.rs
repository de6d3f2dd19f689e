use service_core::config::{self as core_config, get_env, get_env_parsed};
use service_core::error::AppError;
use service_core::events::EventBusBackend;
use service_core::grpc::RpcAdapterConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub common: core_config::Config,
    /// Port of the gRPC health service; 0 binds an ephemeral port.
    pub grpc_port: u16,
    pub storage: StorageBackend,
    pub mongodb: MongoConfig,
    pub event_bus: EventBusConfig,
    pub rpc: RpcAdapterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    MongoDb,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(StorageBackend::MongoDb),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Invalid storage backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub backend: EventBusBackend,
    pub partitions: u32,
    /// Consumer group shared by every chat-service instance.
    pub consumer_group: String,
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        let storage: StorageBackend = get_env("STORAGE_BACKEND", Some("mongodb"), false)?.parse()?;
        let mongo_uri_default = match storage {
            StorageBackend::MongoDb => None,
            StorageBackend::Memory => Some(""),
        };

        Ok(ChatConfig {
            common,
            grpc_port: get_env_parsed("CHAT_GRPC_PORT", 50054)?,
            storage,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", mongo_uri_default, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("chat_db"), is_prod)?,
            },
            event_bus: EventBusConfig {
                backend: EventBusBackend::from_env(is_prod)?,
                partitions: get_env_parsed("EVENT_BUS_PARTITIONS", 4)?,
                consumer_group: get_env("CONSUMER_GROUP_ID", Some("chat-service"), false)?,
            },
            rpc: RpcAdapterConfig {
                request_timeout: Duration::from_millis(get_env_parsed("RPC_TIMEOUT_MS", 5000)?),
                ..Default::default()
            },
        })
    }

    /// In-process configuration on ephemeral ports, used by tests.
    pub fn in_memory() -> Self {
        ChatConfig {
            common: core_config::Config::default(),
            grpc_port: 0,
            storage: StorageBackend::Memory,
            mongodb: MongoConfig {
                uri: String::new(),
                database: "chat_db".to_string(),
            },
            event_bus: EventBusConfig {
                backend: EventBusBackend::Memory,
                partitions: 4,
                consumer_group: "chat-service".to_string(),
            },
            rpc: RpcAdapterConfig::default(),
        }
    }
}

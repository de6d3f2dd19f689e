use chrono::FixedOffset;
use service_core::config::{self as core_config, get_env, get_env_parsed};
use service_core::error::AppError;
use service_core::events::EventBusBackend;
use std::str::FromStr;
use std::time::Duration;

use crate::workflow::SchedulePolicy;

#[derive(Debug, Clone)]
pub struct AppointmentConfig {
    pub common: core_config::Config,
    /// 0 binds an ephemeral port.
    pub grpc_port: u16,
    pub storage: StorageBackend,
    pub mongodb: MongoConfig,
    pub event_bus: EventBusConfig,
    pub schedule: ScheduleConfig,
    pub reminder_interval: Duration,
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
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub open_hour: u32,
    pub close_hour: u32,
    pub utc_offset_minutes: i32,
    pub max_advance_days: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let policy = SchedulePolicy::default();
        Self {
            open_hour: policy.open_hour,
            close_hour: policy.close_hour,
            utc_offset_minutes: 0,
            max_advance_days: policy.max_advance_days,
        }
    }
}

impl ScheduleConfig {
    pub fn policy(&self) -> Result<SchedulePolicy, AppError> {
        if self.open_hour >= self.close_hour || self.close_hour > 24 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Business hours {}-{} are not a valid range",
                self.open_hour,
                self.close_hour
            )));
        }
        let utc_offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(
                "Invalid UTC offset: {} minutes",
                self.utc_offset_minutes
            ))
        })?;
        Ok(SchedulePolicy {
            open_hour: self.open_hour,
            close_hour: self.close_hour,
            max_advance_days: self.max_advance_days,
            utc_offset,
            ..Default::default()
        })
    }
}

impl AppointmentConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        let storage: StorageBackend = get_env("STORAGE_BACKEND", Some("mongodb"), false)?.parse()?;
        let mongo_uri_default = match storage {
            StorageBackend::MongoDb => None,
            StorageBackend::Memory => Some(""),
        };

        Ok(AppointmentConfig {
            common,
            grpc_port: get_env_parsed("APPOINTMENT_GRPC_PORT", 50053)?,
            storage,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", mongo_uri_default, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("appointment_db"), is_prod)?,
            },
            event_bus: EventBusConfig {
                backend: EventBusBackend::from_env(is_prod)?,
                partitions: get_env_parsed("EVENT_BUS_PARTITIONS", 4)?,
            },
            schedule: ScheduleConfig {
                open_hour: get_env_parsed("BUSINESS_OPEN_HOUR", 9)?,
                close_hour: get_env_parsed("BUSINESS_CLOSE_HOUR", 18)?,
                utc_offset_minutes: get_env_parsed("BUSINESS_UTC_OFFSET_MINUTES", 0)?,
                max_advance_days: get_env_parsed("MAX_ADVANCE_DAYS", 90)?,
            },
            reminder_interval: Duration::from_secs(get_env_parsed(
                "REMINDER_INTERVAL_SECS",
                60,
            )?),
        })
    }

    /// In-process configuration on ephemeral ports, used by tests.
    pub fn in_memory() -> Self {
        AppointmentConfig {
            common: core_config::Config::default(),
            grpc_port: 0,
            storage: StorageBackend::Memory,
            mongodb: MongoConfig {
                uri: String::new(),
                database: "appointment_db".to_string(),
            },
            event_bus: EventBusConfig {
                backend: EventBusBackend::Memory,
                partitions: 4,
            },
            schedule: ScheduleConfig::default(),
            reminder_interval: Duration::from_secs(60),
        }
    }
}

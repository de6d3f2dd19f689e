use service_core::config::{self as core_config, get_env_parsed};
use service_core::error::AppError;
use service_core::grpc::RpcAdapterConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    /// Applied when a query names no deadline of its own.
    pub default_deadline: Duration,
    /// Upper bound on a caller-supplied deadline.
    pub max_deadline: Duration,
    pub rpc: RpcAdapterConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            common: core_config::Config::default(),
            default_deadline: Duration::from_millis(3000),
            max_deadline: Duration::from_millis(30_000),
            rpc: RpcAdapterConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let config = GatewayConfig {
            common,
            default_deadline: Duration::from_millis(get_env_parsed("GATEWAY_DEADLINE_MS", 3000)?),
            max_deadline: Duration::from_millis(get_env_parsed(
                "GATEWAY_MAX_DEADLINE_MS",
                30_000,
            )?),
            rpc: RpcAdapterConfig {
                request_timeout: Duration::from_millis(get_env_parsed("RPC_TIMEOUT_MS", 5000)?),
                ..Default::default()
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.default_deadline.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GATEWAY_DEADLINE_MS must be positive"
            )));
        }
        if self.default_deadline > self.max_deadline {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GATEWAY_DEADLINE_MS exceeds GATEWAY_MAX_DEADLINE_MS"
            )));
        }
        Ok(())
    }

    /// Deadline for one query: the requested one within `(0, max]`, else the
    /// default.
    pub fn deadline_for(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(0) | None => self.default_deadline,
            Some(ms) => Duration::from_millis(ms).min(self.max_deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_deadline_is_capped() {
        let config = GatewayConfig::default();
        assert_eq!(config.deadline_for(None), Duration::from_millis(3000));
        assert_eq!(config.deadline_for(Some(0)), Duration::from_millis(3000));
        assert_eq!(config.deadline_for(Some(250)), Duration::from_millis(250));
        assert_eq!(config.deadline_for(Some(120_000)), Duration::from_secs(30));
    }

    #[test]
    fn default_above_max_is_rejected() {
        let config = GatewayConfig {
            default_deadline: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Resilient RPC client adapter.
//!
//! Wraps a [`ServiceEndpoint`] into a lazily connected channel and runs typed
//! calls through a per-call timeout and bounded retry. Every call emits one
//! structured log line and two metrics.
//!
//! Call sites pick the failure policy per method:
//! - [`RpcAdapter::call`] returns the error to the caller (primary path);
//! - [`RpcAdapter::call_once`] is the primary path for non-idempotent
//!   mutations, never replayed;
//! - [`RpcAdapter::call_or_default`] logs at `warn` and returns a fallback
//!   (enrichment path).

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tonic::transport::{Channel, Endpoint};
use tonic::{Response, Status};

use super::directory::ServiceEndpoint;
use super::retry::{RetryConfig, call_with_retry};
use crate::error::AppError;

/// Timeouts and retry policy shared by the clients of one process.
#[derive(Clone, Debug)]
pub struct RpcAdapterConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RpcAdapterConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RpcAdapter {
    endpoint: ServiceEndpoint,
    channel: Channel,
    timeout: Duration,
    retry: RetryConfig,
}

impl RpcAdapter {
    /// Build an adapter without connecting; the first call opens the
    /// connection. Must be called from within a Tokio runtime.
    pub fn new(endpoint: ServiceEndpoint, config: &RpcAdapterConfig) -> Result<Self, AppError> {
        let channel = Endpoint::from_shared(endpoint.address.clone())
            .map_err(|e| {
                AppError::NotConfigured(format!(
                    "invalid address '{}' for {}: {}",
                    endpoint.address, endpoint.logical_name, e
                ))
            })?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .connect_lazy();

        Ok(Self {
            endpoint,
            channel,
            timeout: config.request_timeout,
            retry: config.retry.clone(),
        })
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Channel to build generated clients on.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Strict call with the adapter's default timeout.
    pub async fn call<T, F, Fut>(&self, method: &'static str, f: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        self.call_within(method, self.timeout, f).await
    }

    /// Strict single attempt. A failure after the request left may still
    /// have been applied by the callee.
    pub async fn call_once<T, F, Fut>(&self, method: &'static str, f: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        self.run(method, self.timeout, &RetryConfig::no_retry(), f)
            .await
    }

    /// Strict call bounded by `timeout`, retries included.
    pub async fn call_within<T, F, Fut>(
        &self,
        method: &'static str,
        timeout: Duration,
        f: F,
    ) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        self.run(method, timeout, &self.retry, f).await
    }

    async fn run<T, F, Fut>(
        &self,
        method: &'static str,
        timeout: Duration,
        retry: &RetryConfig,
        f: F,
    ) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        let start = Instant::now();
        let result =
            match tokio::time::timeout(timeout, call_with_retry(retry, method, f)).await {
                Ok(Ok(response)) => Ok(response.into_inner()),
                Ok(Err(status)) => Err(AppError::from(status)),
                Err(_) => Err(AppError::Unreachable(format!(
                    "{}.{} timed out after {}ms",
                    self.endpoint.logical_name,
                    method,
                    timeout.as_millis()
                ))),
            };

        let elapsed = start.elapsed();
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        let labels = [
            ("service", self.endpoint.logical_name.to_string()),
            ("method", method.to_string()),
            ("outcome", outcome.to_string()),
        ];
        counter!("rpc_client_calls_total", &labels).increment(1);
        histogram!("rpc_client_call_duration_seconds", &labels).record(elapsed.as_secs_f64());

        match &result {
            Ok(_) => tracing::info!(
                service = self.endpoint.logical_name,
                method,
                latency_ms = elapsed.as_millis() as u64,
                outcome,
                "RPC call completed"
            ),
            Err(err) => tracing::info!(
                service = self.endpoint.logical_name,
                method,
                latency_ms = elapsed.as_millis() as u64,
                outcome,
                error = %err,
                "RPC call failed"
            ),
        }

        result
    }

    /// Enrichment call: any failure is logged and replaced with `fallback`.
    pub async fn call_or_default<T, F, Fut>(&self, method: &'static str, fallback: T, f: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response<T>, Status>>,
    {
        match self.call(method, f).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    service = self.endpoint.logical_name,
                    method,
                    error = %err,
                    "RPC enrichment failed, using fallback"
                );
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn endpoint(address: &str) -> ServiceEndpoint {
        ServiceEndpoint {
            logical_name: "user",
            address: address.to_string(),
            contract: "proptech.user.v1.UserService",
        }
    }

    fn fast_config() -> RpcAdapterConfig {
        RpcAdapterConfig {
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(300),
            retry: RetryConfig {
                initial_backoff: Duration::from_millis(1),
                jitter: 0.0,
                ..RetryConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn invalid_address_is_not_configured() {
        let err = RpcAdapter::new(endpoint("not a uri"), &fast_config()).unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn success_returns_inner_message() {
        let adapter = RpcAdapter::new(endpoint("http://127.0.0.1:1"), &fast_config()).unwrap();
        let value = adapter
            .call("GetUser", || async { Ok(Response::new(7u32)) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn remote_business_error_is_decoded() {
        let adapter = RpcAdapter::new(endpoint("http://127.0.0.1:1"), &fast_config()).unwrap();
        let err = adapter
            .call("CreateAppointment", || async {
                Err::<Response<()>, _>(AppError::ScheduleConflict("busy".into()).into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ScheduleConflict(_)));
    }

    #[tokio::test]
    async fn local_timeout_is_unreachable() {
        let adapter = RpcAdapter::new(endpoint("http://127.0.0.1:1"), &fast_config()).unwrap();
        let err = adapter
            .call_within("GetUser", Duration::from_millis(20), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Response::new(()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unreachable(_)));
    }

    #[tokio::test]
    async fn single_attempt_call_skips_retries() {
        let adapter = RpcAdapter::new(endpoint("http://127.0.0.1:1"), &fast_config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let err = adapter
            .call_once("CreateAppointment", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<Response<()>, _>(Status::unavailable("connection reset"))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unreachable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broker_outage_reported_by_callee_is_not_retried() {
        let adapter = RpcAdapter::new(endpoint("http://127.0.0.1:1"), &fast_config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let err = adapter
            .call("ConfirmAppointment", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<Response<()>, _>(AppError::BrokerUnavailable("publish".into()).into())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BrokerUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_is_returned_after_retries() {
        let adapter = RpcAdapter::new(endpoint("http://127.0.0.1:1"), &fast_config()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let value = adapter
            .call_or_default("GetUser", "fallback", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Status::unavailable("down"))
                }
            })
            .await;
        assert_eq!(value, "fallback");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

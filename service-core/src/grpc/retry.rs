//! Attempt-bounded retry of transient gRPC failures.
//!
//! Delays follow the `backoff` crate's randomized exponential schedule, the
//! same one the event producer uses. Total time is bounded by the caller.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tonic::{Code, Status};

use super::error::ERROR_KIND_KEY;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Each delay is drawn from `delay * (1 ± jitter)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.jitter)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Transient conditions on the callee side. Business errors and `INTERNAL`
/// are final.
///
/// A status carrying `x-error-kind` came out of the callee's handler, so the
/// request was processed; only transport-level failures are replayed.
pub fn is_retryable(status: &Status) -> bool {
    if status.metadata().contains_key(ERROR_KIND_KEY) {
        return false;
    }
    matches!(
        status.code(),
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted
    )
}

/// Run `call` until it succeeds, fails permanently or runs out of retries.
pub async fn call_with_retry<F, Fut, T>(
    config: &RetryConfig,
    method: &str,
    call: F,
) -> Result<T, Status>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut schedule = config.schedule();
    let mut retries = 0;

    loop {
        let status = match call().await {
            Ok(response) => return Ok(response),
            Err(status) => status,
        };

        if retries >= config.max_retries || !is_retryable(&status) {
            return Err(status);
        }
        let Some(delay) = schedule.next_backoff() else {
            return Err(status);
        };

        retries += 1;
        tracing::warn!(
            method,
            retry = retries,
            code = ?status.code(),
            delay_ms = delay.as_millis() as u64,
            "Transient RPC failure"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(
        calls: &Arc<AtomicU32>,
        status: Status,
    ) -> impl Fn() -> std::future::Ready<Result<(), Status>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(status.clone()))
        }
    }

    #[test]
    fn schedule_without_jitter_doubles_up_to_cap() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            jitter: 0.0,
            ..Default::default()
        };
        let mut schedule = config.schedule();

        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn only_transient_codes_are_retryable() {
        assert!(is_retryable(&Status::unavailable("user service restarting")));
        assert!(is_retryable(&Status::resource_exhausted("too many calls")));
        assert!(!is_retryable(&Status::invalid_argument("weekend date")));
        assert!(!is_retryable(&Status::already_exists("agent busy")));
        assert!(!is_retryable(&Status::internal("boom")));
    }

    #[test]
    fn handler_errors_are_never_replayed() {
        use crate::error::AppError;

        let broker_down: Status = AppError::BrokerUnavailable("redis down".into()).into();
        assert_eq!(broker_down.code(), Code::Unavailable);
        assert!(!is_retryable(&broker_down));

        let callee_unreachable: Status = AppError::Unreachable("user service".into()).into();
        assert!(!is_retryable(&callee_unreachable));
    }

    #[tokio::test]
    async fn persisted_booking_with_failed_publish_is_called_once() {
        use crate::error::AppError;

        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };

        let stored = counting(&calls, AppError::BrokerUnavailable("publish".into()).into());
        let err = call_with_retry(&config, "CreateAppointment", stored)
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_conflict_is_final() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };

        let overlap = counting(&calls, Status::already_exists("overlap"));
        let err = call_with_retry(&config, "CreateAppointment", overlap)
            .await
            .unwrap_err();

        assert_eq!(err.code(), Code::AlreadyExists);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_is_retried_up_to_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            jitter: 0.0,
            ..Default::default()
        };

        let down = counting(&calls, Status::unavailable("down"));
        let result = call_with_retry(&config, "GetUser", down).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovery_after_a_retry_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };

        let result = call_with_retry(&config, "GetProperty", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if attempt == 0 {
                Err(Status::unavailable("warming up"))
            } else {
                Ok(7)
            })
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

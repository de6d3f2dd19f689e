use service_core::error::AppError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Request-wide cut-off shared by every call made for one query.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline(Instant::now() + budget)
    }

    /// Run a primary call. Missing the deadline fails it as `Unreachable`.
    pub async fn primary<T, F>(&self, call: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match timeout_at(self.0, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Unreachable(format!(
                "{} did not finish before the request deadline",
                call
            ))),
        }
    }

    /// Run an enrichment. Missing the deadline yields `fallback()`.
    pub async fn optional<T, F, D>(&self, call: &str, fut: F, fallback: D) -> T
    where
        F: Future<Output = T>,
        D: FnOnce() -> T,
    {
        match timeout_at(self.0, fut).await {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(call, "Enrichment cut off by request deadline, using default");
                fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_primary_is_unreachable() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result: Result<(), AppError> = deadline
            .primary("GetUser", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Unreachable(_))));
    }

    #[tokio::test]
    async fn late_enrichment_falls_back() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let value = deadline
            .optional(
                "GetProperty",
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Some(1)
                },
                || None,
            )
            .await;
        assert_eq!(value, None);

        let value = Deadline::after(Duration::from_secs(1))
            .optional("GetProperty", async { Some(2) }, || None)
            .await;
        assert_eq!(value, Some(2));
    }
}

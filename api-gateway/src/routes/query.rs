//! `POST /api/query`: resolve a batch of named operations concurrently.

use axum::{extract::State, http::HeaderMap, Json};
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GatewayConfig;
use crate::resolvers::{Deadline, Operation, QueryContext, Resolver};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct GatewayState {
    pub resolver: Arc<Resolver>,
    pub config: Arc<GatewayConfig>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub operations: Vec<OperationRequest>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OperationRequest {
    #[serde(default)]
    pub alias: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl OperationRequest {
    fn key(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldError {
    pub path: Vec<String>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Map<String, Value>,
    pub errors: Vec<FieldError>,
}

fn caller(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn query(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let started = Instant::now();
    let budget: Duration = state.config.deadline_for(request.deadline_ms);
    let ctx = QueryContext {
        caller: caller(&headers),
        deadline: Deadline::after(budget),
    };

    let mut seen = HashSet::new();
    let fields = request.operations.into_iter().map(|op| {
        let key = op.key();
        let duplicate = !seen.insert(key.clone());
        let resolver = state.resolver.clone();
        let ctx = ctx.clone();
        async move {
            let result = if duplicate {
                Err(AppError::ValidationFailed(format!(
                    "Duplicate field name: {}",
                    key
                )))
            } else {
                match op.name.parse::<Operation>() {
                    Ok(operation) => resolver.resolve(&ctx, operation, op.arguments).await,
                    Err(e) => Err(e),
                }
            };
            (key, op.name, result)
        }
    });
    let resolved = join_all(fields).await;

    let mut data = Map::new();
    let mut errors = Vec::new();
    for (key, name, result) in resolved {
        match result {
            Ok(value) => {
                counter!("gateway_operations_total", "operation" => name, "outcome" => "ok")
                    .increment(1);
                data.insert(key, value);
            }
            Err(e) => {
                tracing::warn!(field = %key, operation = %name, error = %e, "Field failed");
                counter!(
                    "gateway_operations_total",
                    "operation" => name,
                    "outcome" => e.kind()
                )
                .increment(1);
                // A duplicate key must not clobber the first field's value.
                data.entry(key.clone()).or_insert(Value::Null);
                errors.push(FieldError {
                    path: vec![key],
                    code: e.kind().to_string(),
                    message: e.detail(),
                });
            }
        }
    }

    histogram!("gateway_query_duration_seconds").record(started.elapsed().as_secs_f64());
    Json(QueryResponse { data, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_is_trimmed_and_optional() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller(&headers), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(caller(&headers), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" U1 "));
        assert_eq!(caller(&headers), Some("U1".to_string()));
    }

    #[test]
    fn alias_defaults_to_operation_name() {
        let op: OperationRequest = serde_json::from_value(serde_json::json!({
            "name": "user",
            "arguments": {"id": "U1"}
        }))
        .unwrap();
        assert_eq!(op.key(), "user");
    }
}

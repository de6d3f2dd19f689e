//! Carries the W3C trace context and the inbound request id across gRPC hops.
//!
//! HTTP entry points scope each request with [`with_request_id`]; every
//! outgoing call made inside that scope picks the id up in
//! [`inject_trace_context`], so a gateway query and the backend work it
//! triggers share one `x-request-id`.

use opentelemetry::trace::TraceContextExt;
use std::future::Future;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_KEY: &str = "traceparent";
pub const TRACESTATE_KEY: &str = "tracestate";
pub const REQUEST_ID_KEY: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Request id of an inbound gRPC call, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Run `fut` with `request_id` visible to [`current_request_id`].
pub async fn with_request_id<F: Future>(request_id: String, fut: F) -> F::Output {
    REQUEST_ID.scope(request_id, fut).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

fn metadata_str<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

/// Server-side interceptor: tag the current span with the caller's request id
/// and expose it to handlers as a [`RequestId`] extension.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(mut request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = metadata_str(request.metadata(), TRACEPARENT_KEY) {
        tracing::debug!(traceparent, "Inbound trace context");
    }

    let request_id = metadata_str(request.metadata(), REQUEST_ID_KEY).map(str::to_string);
    if let Some(id) = request_id {
        Span::current().record("request_id", id.as_str());
        request.extensions_mut().insert(RequestId(id));
    }

    Ok(request)
}

/// `traceparent` and optional `tracestate` of the current span, if it is
/// part of a sampled or remote trace.
fn current_trace_headers() -> Option<(String, String)> {
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return None;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    Some((traceparent, span_context.trace_state().header()))
}

/// Stamp an outgoing request with the current trace context and request id.
pub fn inject_trace_context<T>(request: &mut Request<T>) {
    let metadata = request.metadata_mut();

    if let Some((traceparent, tracestate)) = current_trace_headers() {
        if let Ok(value) = traceparent.parse() {
            metadata.insert(TRACEPARENT_KEY, value);
        }
        if !tracestate.is_empty()
            && let Ok(value) = tracestate.parse()
        {
            metadata.insert(TRACESTATE_KEY, value);
        }
    }

    if let Some(id) = current_request_id()
        && let Ok(value) = id.parse()
    {
        metadata.insert(REQUEST_ID_KEY, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scoped_request_id_is_forwarded() {
        let request = with_request_id("req-42".to_string(), async {
            let mut request = Request::new(());
            inject_trace_context(&mut request);
            request
        })
        .await;

        assert_eq!(
            metadata_str(request.metadata(), REQUEST_ID_KEY),
            Some("req-42")
        );
    }

    #[test]
    fn unscoped_call_carries_no_request_id() {
        let mut request = Request::new(());
        inject_trace_context(&mut request);
        assert!(request.metadata().get(REQUEST_ID_KEY).is_none());
        assert_eq!(current_request_id(), None);
    }

    #[test]
    fn interceptor_exposes_request_id_extension() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "req-7".parse().unwrap());

        let request = trace_context_interceptor(request).unwrap();
        assert_eq!(
            request.extensions().get::<RequestId>(),
            Some(&RequestId("req-7".to_string()))
        );

        assert!(trace_context_interceptor(Request::new(())).is_ok());
    }
}

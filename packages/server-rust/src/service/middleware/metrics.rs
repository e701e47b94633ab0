//! Metrics middleware for dispatch.
//!
//! Wraps each dispatch in a `tracing` span and records
//! `opwire_dispatch_total{operation,outcome}` and
//! `opwire_dispatch_duration_seconds{operation}` through the `metrics` facade.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::handler::BoxFuture;
use crate::service::operation::{DispatchError, DispatchOutcome, DispatchResult, InboundRequest};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatches with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records dispatch duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<InboundRequest> for MetricsService<S>
where
    S: Service<InboundRequest, Response = DispatchOutcome, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = DispatchOutcome;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: InboundRequest) -> Self::Future {
        let span = info_span!(
            "dispatch",
            verb = %request.verb,
            path = %request.path,
            operation = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let (operation, outcome) = match &result {
                    Ok(DispatchOutcome::Reply { operation, .. }) => (operation.clone(), "reply"),
                    Ok(DispatchOutcome::Accepted { operation, .. }) => {
                        (operation.clone(), "accepted")
                    }
                    Err(err) => (
                        err.operation().unwrap_or("-").to_string(),
                        err.kind().as_str(),
                    ),
                };

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("operation", operation.as_str());
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!(
                    "opwire_dispatch_total",
                    "operation" => operation.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("opwire_dispatch_duration_seconds", "operation" => operation)
                    .record(elapsed.as_secs_f64());

                tracing::debug!(duration_ms, outcome, "dispatch complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use opwire_core::WireFormat;
    use tower::ServiceExt;

    use super::*;

    /// Immediately-completing service for metrics testing.
    struct ImmediateService;

    impl Service<InboundRequest> for ImmediateService {
        type Response = DispatchOutcome;
        type Error = DispatchError;
        type Future = BoxFuture<'static, DispatchResult>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: InboundRequest) -> Self::Future {
            Box::pin(async move {
                if request.path == "/fail" {
                    return Err(DispatchError::RouteNotFound {
                        verb: request.verb,
                        path: request.path,
                    });
                }
                Ok(DispatchOutcome::Reply {
                    operation: "GetCustomer".to_string(),
                    format: WireFormat::Json,
                    body: Bytes::from_static(b"{}"),
                })
            })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let resp = svc.oneshot(InboundRequest::new("GET", "/customer/1")).await.unwrap();
        assert_eq!(resp.operation(), "GetCustomer");
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_errors() {
        let svc = MetricsLayer.layer(ImmediateService);
        let err = svc.oneshot(InboundRequest::new("GET", "/fail")).await.unwrap_err();
        assert!(matches!(err, DispatchError::RouteNotFound { .. }));
    }
}

//! Timeout middleware for dispatch.
//!
//! Rejects requests that exceed their timeout with `DispatchError::TimedOut`.
//! The timeout is the request's own `timeout` when set, otherwise the
//! layer's default.

use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::service::handler::BoxFuture;
use crate::service::operation::{DispatchError, DispatchOutcome, DispatchResult, InboundRequest};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-request timeout enforcement.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    default_timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default_timeout: self.default_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-request timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default_timeout: Duration,
}

impl<S> Service<InboundRequest> for TimeoutService<S>
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
        let duration = request.timeout.unwrap_or(self.default_timeout);
        let fut = self.inner.call(request);
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(DispatchError::TimedOut {
                    timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

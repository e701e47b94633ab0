//! Pipeline composition: combines all middleware layers into a single service stack.

use std::time::Duration;

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::config::ServerConfig;
use crate::service::dispatcher::RequestDispatcher;

/// The dispatcher wrapped in load shedding, timeout and metrics.
pub type DispatchPipeline = LoadShedService<TimeoutService<MetricsService<RequestDispatcher>>>;

/// Build the dispatch pipeline by wrapping the `RequestDispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-request timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the dispatcher)
///
/// The returned service implements `tower::Service<InboundRequest>` and is `Clone`.
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: RequestDispatcher, config: &ServerConfig) -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(TimeoutLayer::new(Duration::from_millis(
            config.default_operation_timeout_ms,
        )))
        .layer(MetricsLayer)
        .service(dispatcher)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! HTTP handler definitions for the opwire server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod dispatch;
pub mod health;
pub mod metadata;

pub use dispatch::dispatch_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use metadata::metadata_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::{DispatchPipeline, RequestDispatcher};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references and cheap-to-clone services.
#[derive(Clone)]
pub struct AppState {
    /// Load shedding, timeout and metrics over the dispatcher.
    pub pipeline: DispatchPipeline,
    /// The dispatcher itself, for registry lookups and fault encoding.
    pub dispatcher: RequestDispatcher,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(
        pipeline: DispatchPipeline,
        dispatcher: RequestDispatcher,
        shutdown: Arc<ShutdownController>,
        config: NetworkConfig,
    ) -> Self {
        Self {
            pipeline,
            dispatcher,
            shutdown,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::AppState;
    use crate::network::{NetworkConfig, ShutdownController};
    use crate::service::domain::register_customer_service;
    use crate::service::{build_dispatch_pipeline, RequestDispatcher, ServerConfig, ServiceRegistry};
    use crate::storage::InMemoryPersistence;

    /// State over the customer demo with an empty in-memory store.
    pub(crate) fn customer_state(config: NetworkConfig) -> (AppState, InMemoryPersistence) {
        let store = InMemoryPersistence::new();
        let mut registry = ServiceRegistry::new();
        register_customer_service(&mut registry, Arc::new(store.clone())).unwrap();
        let server_config = ServerConfig::default();
        let dispatcher = RequestDispatcher::from_registry(registry, server_config.clone()).unwrap();
        let pipeline = build_dispatch_pipeline(dispatcher.clone(), &server_config);
        let shutdown = Arc::new(ShutdownController::new());
        shutdown.set_ready();
        (AppState::new(pipeline, dispatcher, shutdown, config), store)
    }
}

//! opwire server: operation registry, route resolution, restriction checks,
//! request dispatch, one-way queue and the axum HTTP transport.

pub mod network;
pub mod service;
pub mod storage;
pub mod traits;

pub use service::{
    build_dispatch_pipeline, handler_fn, InboundRequest, OperationHandler, RequestDispatcher,
    ServerConfig, ServiceError, ServiceRegistry,
};
pub use storage::InMemoryPersistence;
pub use traits::{Entity, PersistenceExt, PersistenceProvider, Transaction};

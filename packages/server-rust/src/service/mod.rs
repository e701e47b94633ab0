//! Operation dispatch framework.
//!
//! A request flows through these stages:
//!
//! 1. **Registration** (`registry`): descriptors and typed handlers, frozen at startup
//! 2. **Routing** (`router`): path + verb -> operation, with inferred and predefined routes
//! 3. **Middleware** (`middleware`): Tower layers (load shedding, timeout, metrics)
//! 4. **Dispatch** (`dispatcher`): restrictions, decoding, handler execution, encoding
//! 5. **One-way queue** (`worker`): background dispatch with dead letters and
//!    correlation (`correlation`)
//! 6. **Domain services** (`domain`): the customer demo

pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod domain;
pub mod handler;
pub mod lifecycle;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use config::ServerConfig;
pub use correlation::{AsyncCorrelationToken, CorrelatedReply, CorrelationOutcome, ReplyCorrelator};
pub use dispatcher::RequestDispatcher;
pub use handler::{handler_fn, HandlerFn, OperationHandler};
pub use lifecycle::{DispatchLifecycle, DispatchState, IllegalTransition};
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use operation::{
    DispatchError, DispatchOutcome, DispatchResult, ErrorKind, FaultResponse, InboundRequest,
    RequestContext, ResponseStatus, ServiceError, StatusCategory, GENERIC_FAULT_MESSAGE,
};
pub use registry::{RegisteredOperation, RegistryError, ServiceRegistry};
pub use router::{
    KeyAttributeInference, NameInference, PredefinedEndpoint, RouteInference, RouteMatch,
    RouteResolver, RouteResolverBuilder, RouteSource,
};
pub use worker::{BackgroundRunnable, BackgroundWorker, DeadLetter, OneWayQueue};

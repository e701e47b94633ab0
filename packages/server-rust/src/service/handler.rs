//! Typed operation handlers and their type-erased form.
//!
//! Hosts implement [`OperationHandler`] for a concrete request DTO (or wrap a
//! closure with [`handler_fn`]). The registry stores handlers behind
//! [`ErasedHandler`], which converts between the format-neutral document and
//! the typed request/response at the edges.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::operation::{RequestContext, ServiceError};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// OperationHandler trait
// ---------------------------------------------------------------------------

/// Business logic for one operation.
///
/// One-way operations typically use `()` as their response; whatever they
/// return is discarded.
#[async_trait]
pub trait OperationHandler<Req>: Send + Sync + 'static
where
    Req: Send + 'static,
{
    type Response: Serialize + Send + 'static;

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// `ServiceError::Typed` is surfaced to the client with its own code;
    /// `ServiceError::Fault` is logged and surfaced as a generic fault.
    async fn handle(&self, request: Req, ctx: &RequestContext) -> Result<Self::Response, ServiceError>;
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// An [`OperationHandler`] backed by an async closure.
pub struct HandlerFn<F, Req> {
    f: F,
    _request: PhantomData<fn(Req)>,
}

/// Wraps `async fn(Req, RequestContext) -> Result<Resp, ServiceError>` as a handler.
pub fn handler_fn<Req, F, Fut, Resp>(f: F) -> HandlerFn<F, Req>
where
    Req: Send + 'static,
    F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    HandlerFn {
        f,
        _request: PhantomData,
    }
}

#[async_trait]
impl<Req, F, Fut, Resp> OperationHandler<Req> for HandlerFn<F, Req>
where
    Req: Send + 'static,
    F: Fn(Req, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    type Response = Resp;

    async fn handle(&self, request: Req, ctx: &RequestContext) -> Result<Resp, ServiceError> {
        (self.f)(request, ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

/// Failure while invoking an erased handler.
#[derive(Debug)]
pub(crate) enum InvokeError {
    /// The handler itself returned an error.
    Service(ServiceError),
    /// The handler's response could not be turned into a document.
    Encode(serde_json::Error),
}

/// A registered handler with its request/response types erased.
///
/// Deserialization and invocation are separate steps so the dispatcher can
/// attribute failures to the right lifecycle stage.
pub(crate) trait ErasedHandler: Send + Sync {
    fn deserialize(&self, document: Value) -> Result<Box<dyn Any + Send>, serde_json::Error>;

    fn invoke<'a>(
        &'a self,
        request: Box<dyn Any + Send>,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Result<Value, InvokeError>>;
}

pub(crate) struct TypedHandler<Req, H> {
    handler: H,
    _request: PhantomData<fn() -> Req>,
}

impl<Req, H> TypedHandler<Req, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

impl<Req, H> ErasedHandler for TypedHandler<Req, H>
where
    Req: DeserializeOwned + Send + 'static,
    H: OperationHandler<Req>,
{
    fn deserialize(&self, document: Value) -> Result<Box<dyn Any + Send>, serde_json::Error> {
        let request: Req = serde_json::from_value(document)?;
        Ok(Box::new(request))
    }

    fn invoke<'a>(
        &'a self,
        request: Box<dyn Any + Send>,
        ctx: &'a RequestContext,
    ) -> BoxFuture<'a, Result<Value, InvokeError>> {
        Box::pin(async move {
            let request = request.downcast::<Req>().map_err(|_| {
                InvokeError::Service(ServiceError::Fault(anyhow::anyhow!(
                    "request DTO type mismatch for '{}'",
                    ctx.operation
                )))
            })?;
            let response = self
                .handler
                .handle(*request, ctx)
                .await
                .map_err(InvokeError::Service)?;
            serde_json::to_value(response).map_err(InvokeError::Encode)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

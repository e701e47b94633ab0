//! Request dispatcher: drives one inbound request through routing,
//! restriction checks, deserialization, handler execution and encoding.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::FutureExt;
use opwire_core::{
    Codec, CodecRegistry, Direction, EndpointAttributes, OperationDescriptor, PathVariables,
    WireFormat,
};
use serde_json::{Map, Value};
use tower::Service;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::config::ServerConfig;
use super::correlation::{CorrelatedReply, ReplyCorrelator};
use super::handler::{BoxFuture, InvokeError};
use super::lifecycle::{DispatchLifecycle, DispatchState};
use super::operation::{
    DispatchError, DispatchOutcome, DispatchResult, FaultResponse, InboundRequest,
    RequestContext, ServiceError,
};
use super::registry::{RegistryError, ServiceRegistry};
use super::router::{PredefinedEndpoint, RouteResolver};

// ---------------------------------------------------------------------------
// RequestDispatcher
// ---------------------------------------------------------------------------

/// Dispatches transport-neutral requests to registered operations.
///
/// Cheap to clone; all state is shared and read-only apart from the call-id
/// counter and the correlator.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    registry: Arc<ServiceRegistry>,
    routes: Arc<RouteResolver>,
    codecs: Arc<CodecRegistry>,
    correlator: Arc<ReplyCorrelator>,
    config: Arc<ServerConfig>,
    next_call_id: Arc<AtomicU64>,
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        routes: Arc<RouteResolver>,
        codecs: Arc<CodecRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            registry,
            routes,
            codecs,
            correlator: Arc::new(ReplyCorrelator::new()),
            config,
            next_call_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Freezes `registry`, compiles its routes with the default strategies and
    /// uses the default codecs.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidRoute` if an inferred route does not parse.
    pub fn from_registry(
        registry: ServiceRegistry,
        config: ServerConfig,
    ) -> Result<Self, RegistryError> {
        let routes = RouteResolver::from_registry(&registry)?;
        Ok(Self::new(
            Arc::new(registry),
            Arc::new(routes),
            Arc::new(CodecRegistry::with_defaults()),
            Arc::new(config),
        ))
    }

    /// Shares an existing correlator, e.g. one also used by a queue.
    #[must_use]
    pub fn with_correlator(mut self, correlator: Arc<ReplyCorrelator>) -> Self {
        self.correlator = correlator;
        self
    }

    #[must_use]
    pub fn correlator(&self) -> &Arc<ReplyCorrelator> {
        &self.correlator
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn routes(&self) -> &Arc<RouteResolver> {
        &self.routes
    }

    #[must_use]
    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Dispatches one request. Never panics: handler panics are reported as
    /// `HandlerFault`.
    ///
    /// # Errors
    ///
    /// Returns the `DispatchError` describing the first stage that failed.
    pub async fn dispatch(&self, request: InboundRequest) -> DispatchResult {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let correlation_id = request.correlation_id;
        let mut lifecycle = DispatchLifecycle::new();

        let result = self.run(call_id, request, &mut lifecycle).await;

        match &result {
            Ok(outcome) => {
                debug!(call_id, operation = outcome.operation(), "dispatch completed");
            }
            Err(err) => {
                let stage = lifecycle.state();
                lifecycle.fail(err.kind());
                log_failure(call_id, stage, err);
            }
        }

        if let Some(id) = correlation_id {
            self.complete_correlation(id, &result);
        }
        result
    }

    async fn run(
        &self,
        call_id: u64,
        request: InboundRequest,
        lifecycle: &mut DispatchLifecycle,
    ) -> DispatchResult {
        let InboundRequest {
            path,
            query,
            verb,
            attributes,
            body,
            content_type,
            accept,
            correlation_id,
            operation: direct,
            ..
        } = request;

        // Routed
        let (operation, path_variables, endpoint) = match direct {
            Some(name) => (self.registry.resolve(&name)?, PathVariables::new(), None),
            None => {
                let found = self.routes.resolve(&path, &verb)?;
                (
                    self.registry.resolve(&found.operation)?,
                    found.path_variables,
                    found.endpoint,
                )
            }
        };
        step(lifecycle, call_id, DispatchState::Routed);

        // Authorized
        let format = self.resolve_format(
            attributes,
            endpoint,
            content_type.as_deref(),
            accept.as_deref(),
            body.is_empty(),
        );
        let direction = resolve_direction(attributes, endpoint, operation.direction());
        let resolved = concrete_attributes(attributes, &verb, format, direction);

        let rule = operation.restriction();
        if self.config.enable_access_restrictions && !rule.is_allowed(resolved) {
            let unmet = rule
                .unmet(resolved)
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DispatchError::RestrictionViolation {
                operation: operation.name().to_string(),
                rule: rule.clone(),
                actual: resolved,
                unmet,
            });
        }
        step(lifecycle, call_id, DispatchState::Authorized);

        // Deserialized
        let codec = self
            .codecs
            .get(format)
            .map_err(|e| DispatchError::serialization(Some(format), e))?;
        let document = decode_document(codec.as_ref(), &body)?;
        let document = bind_fields(document, query, operation.descriptor(), format)?;
        let document = bind_fields(
            document,
            path_variables.iter().map(|(k, v)| (k.clone(), v.clone())),
            operation.descriptor(),
            format,
        )?;
        let dto = operation.handler().deserialize(document).map_err(|e| {
            DispatchError::serialization(
                Some(format),
                format_args!("invalid {} request: {e}", operation.name()),
            )
        })?;
        step(lifecycle, call_id, DispatchState::Deserialized);

        // Executed
        let ctx = RequestContext {
            call_id,
            operation: operation.name().to_string(),
            attributes: resolved,
            format,
            path_variables,
            correlation_id,
        };
        let invoked = AssertUnwindSafe(operation.handler().invoke(dto, &ctx))
            .catch_unwind()
            .await;
        let output = match invoked {
            Err(payload) => {
                return Err(DispatchError::HandlerFault {
                    operation: ctx.operation,
                    source: anyhow::anyhow!("handler panicked: {}", panic_message(payload.as_ref())),
                })
            }
            Ok(Err(InvokeError::Service(err))) => return Err(from_service(ctx.operation, err)),
            Ok(Err(InvokeError::Encode(err))) => Err(err),
            Ok(Ok(value)) => Ok(value),
        };
        step(lifecycle, call_id, DispatchState::Executed);

        if direction == Direction::OneWay {
            step(lifecycle, call_id, DispatchState::Completed);
            return Ok(DispatchOutcome::Accepted {
                operation: ctx.operation,
                correlation_id,
            });
        }

        // Serialized; encode failures are server faults
        let value = output.map_err(|e| DispatchError::HandlerFault {
            operation: ctx.operation.clone(),
            source: anyhow::Error::new(e).context("failed to serialize response"),
        })?;
        let body = codec.encode(&value).map_err(|e| DispatchError::HandlerFault {
            operation: ctx.operation.clone(),
            source: anyhow::Error::new(e).context(format!("failed to encode {format} response")),
        })?;
        step(lifecycle, call_id, DispatchState::Serialized);

        step(lifecycle, call_id, DispatchState::Completed);
        Ok(DispatchOutcome::Reply {
            operation: ctx.operation,
            format,
            body: Bytes::from(body),
        })
    }

    /// Attribute flag, then predefined endpoint, then `Content-Type` (when a
    /// body is present), then weighted `Accept` negotiation, then the
    /// configured default.
    fn resolve_format(
        &self,
        attributes: EndpointAttributes,
        endpoint: Option<PredefinedEndpoint>,
        content_type: Option<&str>,
        accept: Option<&str>,
        body_is_empty: bool,
    ) -> WireFormat {
        WireFormat::from_attributes(attributes)
            .or_else(|| endpoint.map(|e| e.format))
            .or_else(|| {
                content_type
                    .filter(|_| !body_is_empty)
                    .and_then(WireFormat::from_content_type)
            })
            .unwrap_or_else(|| self.negotiate_accept(accept))
    }

    /// Response format for an `Accept` header: the highest-weighted format
    /// with a registered codec, otherwise the configured default.
    #[must_use]
    pub fn negotiate_accept(&self, accept: Option<&str>) -> WireFormat {
        let fallback = self.config.default_format;
        accept.map_or(fallback, |accept| self.codecs.negotiate_accept(accept, fallback))
    }

    /// Encodes a fault in `preferred` format, falling back to JSON when that
    /// format has no codec.
    #[must_use]
    pub fn encode_fault(&self, fault: &FaultResponse, preferred: WireFormat) -> (WireFormat, Bytes) {
        let encoded = serde_json::to_value(fault)
            .ok()
            .and_then(|doc| {
                let codec = self.codecs.get(preferred).ok()?;
                codec.encode(&doc).ok()
            });
        match encoded {
            Some(bytes) => (preferred, Bytes::from(bytes)),
            None => (
                WireFormat::Json,
                Bytes::from(serde_json::to_vec(fault).unwrap_or_default()),
            ),
        }
    }

    fn complete_correlation(&self, id: Uuid, result: &DispatchResult) {
        let reply = match result {
            Ok(outcome) => CorrelatedReply::Completed {
                operation: outcome.operation().to_string(),
                body: outcome.body().cloned(),
            },
            Err(err) => CorrelatedReply::Failed(err.to_fault()),
        };
        if !self.correlator.complete(id, reply) {
            debug!(correlation_id = %id, "no waiter registered for correlation id");
        }
    }
}

// ---------------------------------------------------------------------------
// tower::Service
// ---------------------------------------------------------------------------

impl Service<InboundRequest> for RequestDispatcher {
    type Response = DispatchOutcome;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: InboundRequest) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { dispatcher.dispatch(request).await })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn step(lifecycle: &mut DispatchLifecycle, call_id: u64, to: DispatchState) {
    if let Err(err) = lifecycle.advance(to) {
        error!(call_id, %err, "dispatch lifecycle violated");
    }
}

/// A direction flag the transport set explicitly wins, then the predefined
/// endpoint, then the operation's own direction.
fn resolve_direction(
    attributes: EndpointAttributes,
    endpoint: Option<PredefinedEndpoint>,
    declared: Direction,
) -> Direction {
    match (attributes.is_reply(), attributes.is_one_way()) {
        (true, false) => Direction::Reply,
        (false, true) => Direction::OneWay,
        _ => endpoint.map_or(declared, |e| e.direction),
    }
}

fn concrete_attributes(
    attributes: EndpointAttributes,
    verb: &str,
    format: WireFormat,
    direction: Direction,
) -> EndpointAttributes {
    let mut resolved = attributes
        .with_group(EndpointAttributes::ANY_FORMAT, format.flag())
        .with_group(EndpointAttributes::ANY_DIRECTION, direction.flag());
    if resolved.verb().is_none() {
        if let Some(flag) = EndpointAttributes::from_http_method(verb) {
            resolved = resolved.with_group(EndpointAttributes::ANY_VERB, flag);
        }
    }
    resolved
}

/// Empty (or whitespace-only text) bodies and `null` decode to `{}`.
fn decode_document(codec: &dyn Codec, body: &[u8]) -> Result<Value, DispatchError> {
    let format = codec.format();
    let blank = body.is_empty()
        || (format != WireFormat::MsgPack && body.iter().all(u8::is_ascii_whitespace));
    if blank {
        return Ok(Value::Object(Map::new()));
    }
    match codec.decode(body) {
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(document) => Ok(document),
        Err(err) => Err(DispatchError::serialization(Some(format), err)),
    }
}

/// Writes query parameters or path variables into the request document,
/// coerced by the declared field kind. A bound value replaces a body field of
/// the same name in any case.
fn bind_fields(
    document: Value,
    pairs: impl IntoIterator<Item = (String, String)>,
    descriptor: &OperationDescriptor,
    format: WireFormat,
) -> Result<Value, DispatchError> {
    let mut pairs = pairs.into_iter().peekable();
    if pairs.peek().is_none() {
        return Ok(document);
    }
    let Value::Object(mut fields) = document else {
        return Err(DispatchError::serialization(
            Some(format),
            "request body must be an object when the route or query binds fields",
        ));
    };
    for (name, raw) in pairs {
        let (key, value) = match descriptor.find_field(&name) {
            Some(field) => (field.name.clone(), field.kind.coerce(&raw)),
            None => (name, Value::String(raw)),
        };
        fields.retain(|existing, _| !existing.eq_ignore_ascii_case(&key));
        fields.insert(key, value);
    }
    Ok(Value::Object(fields))
}

fn from_service(operation: String, err: ServiceError) -> DispatchError {
    match err {
        ServiceError::Typed {
            status,
            code,
            message,
        } => DispatchError::Typed {
            operation,
            status,
            code,
            message,
        },
        ServiceError::Fault(source) => DispatchError::HandlerFault { operation, source },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn log_failure(call_id: u64, stage: DispatchState, err: &DispatchError) {
    match err {
        DispatchError::HandlerFault { operation, source } => {
            error!(call_id, %stage, operation = %operation, error = %format_args!("{source:#}"), "handler fault");
        }
        DispatchError::RestrictionViolation { operation, actual, .. } => {
            warn!(call_id, %stage, operation = %operation, attributes = %actual, "{err}");
        }
        DispatchError::SerializationFault { .. } | DispatchError::TimedOut { .. } => {
            warn!(call_id, %stage, kind = %err.kind(), "{err}");
        }
        _ => debug!(call_id, %stage, kind = %err.kind(), "{err}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use std::collections::HashMap;

    use opwire_core::{FieldKind, MsgPackCodec, RestrictionRule};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::service::correlation::CorrelationOutcome;
    use crate::service::handler::{handler_fn, OperationHandler};
    use crate::service::operation::{ErrorKind, StatusCategory, GENERIC_FAULT_MESSAGE};

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct GetCustomer {
        id: i64,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct CustomerResponse {
        id: i64,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "PascalCase", default)]
    struct DeleteCustomer {
        id: i64,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Hello {
        #[serde(default)]
        name: Option<String>,
    }

    /// Counts invocations so tests can assert a handler never ran.
    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl OperationHandler<DeleteCustomer> for Counting {
        type Response = ();

        async fn handle(&self, _req: DeleteCustomer, _ctx: &RequestContext) -> Result<(), ServiceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher_with(config: ServerConfig, deletes: Arc<AtomicUsize>) -> RequestDispatcher {
        let mut registry = ServiceRegistry::new();
        registry
            .register(
                OperationDescriptor::new("GetCustomer")
                    .returns("CustomerResponse")
                    .route("/customer/{Id}", Some("GET"))
                    .field("Id", FieldKind::Integer),
                handler_fn(|req: GetCustomer, _ctx| async move {
                    Ok::<_, ServiceError>(CustomerResponse { id: req.id })
                }),
            )
            .unwrap();
        registry
            .register(
                OperationDescriptor::new("DeleteCustomer")
                    .route("/customer/{Id}", Some("DELETE"))
                    .field("Id", FieldKind::Integer)
                    .restrict(RestrictionRule::all_of(EndpointAttributes::SECURE)),
                Counting(deletes),
            )
            .unwrap();
        registry
            .register(
                OperationDescriptor::new("Hello").returns("HelloResponse"),
                handler_fn(|req: Hello, ctx: RequestContext| async move {
                    match req.name.as_deref() {
                        Some("panic") => panic!("boom"),
                        Some("fault") => Err(ServiceError::Fault(anyhow::anyhow!("db-01 unreachable"))),
                        Some("typed") => Err(ServiceError::typed(
                            StatusCategory::Conflict,
                            "AlreadyGreeted",
                            "already said hello",
                        )),
                        name => Ok(json!({
                            "Result": format!("Hello, {}", name.unwrap_or("world")),
                            "Format": ctx.format.path_name(),
                        })),
                    }
                }),
            )
            .unwrap();

        registry
            .register(
                OperationDescriptor::new("GetGrid").route("/grid", Some("GET")),
                handler_fn(|_req: Hello, _ctx: RequestContext| async move {
                    Ok::<_, ServiceError>(HashMap::from([((1, 2), 3)]))
                }),
            )
            .unwrap();

        let mut codecs = CodecRegistry::new();
        codecs.register(opwire_core::JsonCodec);
        codecs.register(MsgPackCodec);
        let routes = RouteResolver::builder()
            .strategy(crate::service::router::NameInference)
            .build(&registry)
            .unwrap();
        RequestDispatcher::new(
            Arc::new(registry),
            Arc::new(routes),
            Arc::new(codecs),
            Arc::new(config),
        )
    }

    fn dispatcher() -> RequestDispatcher {
        dispatcher_with(ServerConfig::default(), Arc::new(AtomicUsize::new(0)))
    }

    fn reply_json(outcome: &DispatchOutcome) -> Value {
        serde_json::from_slice(outcome.body().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn get_customer_by_path() {
        let outcome = dispatcher()
            .dispatch(InboundRequest::new("GET", "/customer/7"))
            .await
            .unwrap();
        assert_eq!(outcome.operation(), "GetCustomer");
        assert_eq!(outcome.body().unwrap().as_ref(), br#"{"Id":7}"#);
    }

    #[tokio::test]
    async fn restriction_violation_never_invokes_handler() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(ServerConfig::default(), deletes.clone());

        let err = dispatcher
            .dispatch(
                InboundRequest::new("DELETE", "/customer/7")
                    .with_attributes(EndpointAttributes::IN_SECURE),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RestrictionViolation);
        assert_eq!(err.status(), StatusCategory::Forbidden);
        assert!(err.to_string().contains("-[Secure]"));
        assert_eq!(deletes.load(Ordering::SeqCst), 0);

        let outcome = dispatcher
            .dispatch(
                InboundRequest::new("DELETE", "/customer/7")
                    .with_attributes(EndpointAttributes::SECURE),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Accepted { .. }));
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restrictions_can_be_disabled() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let config = ServerConfig {
            enable_access_restrictions: false,
            ..ServerConfig::default()
        };
        let dispatcher = dispatcher_with(config, deletes.clone());
        dispatcher
            .dispatch(InboundRequest::new("DELETE", "/customer/3"))
            .await
            .unwrap();
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_requests_give_identical_replies() {
        let dispatcher = dispatcher();
        let first = dispatcher
            .dispatch(InboundRequest::new("GET", "/customer/42"))
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(InboundRequest::new("GET", "/customer/42"))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_body_deserializes_as_empty_object() {
        let outcome = dispatcher()
            .dispatch(InboundRequest::new("POST", "/hello").with_body("application/json", ""))
            .await
            .unwrap();
        assert_eq!(reply_json(&outcome)["Result"], "Hello, world");
    }

    #[tokio::test]
    async fn path_variables_override_body_fields() {
        let outcome = dispatcher()
            .dispatch(
                InboundRequest::new("GET", "/customer/5")
                    .with_body("application/json", r#"{"id": 99}"#),
            )
            .await
            .unwrap();
        assert_eq!(reply_json(&outcome), json!({"Id": 5}));
    }

    #[tokio::test]
    async fn query_binds_fields_below_path_variables() {
        let outcome = dispatcher()
            .dispatch(
                InboundRequest::new("POST", "/hello")
                    .with_query(vec![("Name".to_string(), "Ada".to_string())])
                    .with_body("application/json", r#"{"Name": "Bob"}"#),
            )
            .await
            .unwrap();
        assert_eq!(reply_json(&outcome)["Result"], "Hello, Ada");

        let outcome = dispatcher()
            .dispatch(
                InboundRequest::new("GET", "/customer/5")
                    .with_query(vec![("Id".to_string(), "6".to_string())]),
            )
            .await
            .unwrap();
        assert_eq!(reply_json(&outcome), json!({"Id": 5}));
    }

    #[tokio::test]
    async fn uncoercible_path_variable_is_a_serialization_fault() {
        let err = dispatcher()
            .dispatch(InboundRequest::new("GET", "/customer/abc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SerializationFault);
        assert!(err.status().is_client_error());
    }

    #[tokio::test]
    async fn malformed_body_is_a_serialization_fault() {
        let err = dispatcher()
            .dispatch(InboundRequest::new("POST", "/hello").with_body("application/json", "{nope"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::SerializationFault {
                format: Some(WireFormat::Json),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn format_without_codec_is_a_serialization_fault() {
        let err = dispatcher()
            .dispatch(InboundRequest::new("POST", "/xml/reply/Hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::SerializationFault {
                format: Some(WireFormat::Xml),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn msgpack_request_gets_msgpack_reply() {
        let body = MsgPackCodec.encode(&json!({"Name": "Ada"})).unwrap();
        let outcome = dispatcher()
            .dispatch(InboundRequest::new("POST", "/hello").with_body("application/x-msgpack", body))
            .await
            .unwrap();
        let DispatchOutcome::Reply { format, body, .. } = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(format, WireFormat::MsgPack);
        let doc = MsgPackCodec.decode(&body).unwrap();
        assert_eq!(doc, json!({"Result": "Hello, Ada", "Format": "msgpack"}));
    }

    #[tokio::test]
    async fn accept_header_picks_format_for_bodyless_requests() {
        let outcome = dispatcher()
            .dispatch(InboundRequest::new("GET", "/hello").with_accept("application/x-msgpack"))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Reply { format: WireFormat::MsgPack, .. }));
    }

    #[tokio::test]
    async fn browser_accept_falls_back_to_default_format() {
        let outcome = dispatcher()
            .dispatch(InboundRequest::new("GET", "/customer/7").with_accept(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Reply { format: WireFormat::Json, .. }));
        assert_eq!(outcome.body().unwrap().as_ref(), br#"{"Id":7}"#);
    }

    #[tokio::test]
    async fn unsupported_content_type_with_body_is_still_a_fault() {
        let err = dispatcher()
            .dispatch(
                InboundRequest::new("POST", "/hello")
                    .with_body("application/xml", "<Hello><Name>Ada</Name></Hello>")
                    .with_accept("application/json"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::SerializationFault {
                format: Some(WireFormat::Xml),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unserializable_response_is_a_server_fault() {
        let err = dispatcher()
            .dispatch(InboundRequest::new("GET", "/grid"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerFault);
        assert_eq!(err.status(), StatusCategory::ServerError);
        assert_eq!(err.operation(), Some("GetGrid"));
        assert_eq!(err.to_fault().message(), GENERIC_FAULT_MESSAGE);
    }

    #[tokio::test]
    async fn handler_fault_hides_details() {
        let err = dispatcher()
            .dispatch(
                InboundRequest::new("POST", "/hello")
                    .with_body("application/json", r#"{"Name":"fault"}"#),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerFault);
        assert_eq!(err.to_fault().message(), GENERIC_FAULT_MESSAGE);
    }

    #[tokio::test]
    async fn handler_panic_becomes_fault() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(
                InboundRequest::new("POST", "/hello")
                    .with_body("application/json", r#"{"Name":"panic"}"#),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::HandlerFault { .. }));
        assert!(err.to_string().contains("boom"));

        // The dispatcher keeps working after a panic.
        dispatcher
            .dispatch(InboundRequest::new("GET", "/customer/1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn typed_error_keeps_status_and_code() {
        let err = dispatcher()
            .dispatch(
                InboundRequest::new("POST", "/hello")
                    .with_body("application/json", r#"{"Name":"typed"}"#),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCategory::Conflict);
        assert_eq!(err.to_fault().error_code(), "AlreadyGreeted");
    }

    #[tokio::test]
    async fn unknown_route_and_operation() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .dispatch(InboundRequest::new("GET", "/nowhere/at/all"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RouteNotFound);

        let err = dispatcher
            .dispatch(InboundRequest::for_operation("NoSuchThing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    }

    #[tokio::test]
    async fn oneway_endpoint_discards_reply() {
        let outcome = dispatcher()
            .dispatch(InboundRequest::new("POST", "/json/oneway/Hello"))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn correlated_one_way_completes_token() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(ServerConfig::default(), deletes);
        let token = dispatcher.correlator().register();

        let outcome = dispatcher
            .dispatch(
                InboundRequest::for_operation("DeleteCustomer")
                    .with_attributes(EndpointAttributes::SECURE)
                    .with_correlation(token.id()),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Accepted { correlation_id: Some(id), .. } if id == token.id()
        ));

        let waited = token.wait(Duration::from_secs(1)).await;
        assert_eq!(
            waited,
            CorrelationOutcome::Completed {
                operation: "DeleteCustomer".to_string(),
                body: None,
            }
        );
    }

    #[tokio::test]
    async fn correlated_failure_reports_fault() {
        let dispatcher = dispatcher();
        let token = dispatcher.correlator().register();
        let _ = dispatcher
            .dispatch(InboundRequest::for_operation("DeleteCustomer").with_correlation(token.id()))
            .await;

        let waited = token.wait(Duration::from_secs(1)).await;
        assert!(matches!(
            waited,
            CorrelationOutcome::Failed(ref fault) if fault.error_code() == "RestrictionViolation"
        ));
    }

    #[tokio::test]
    async fn dispatcher_is_a_tower_service() {
        let outcome = dispatcher()
            .oneshot(InboundRequest::new("GET", "/customer/11"))
            .await
            .unwrap();
        assert_eq!(outcome.body().unwrap().as_ref(), br#"{"Id":11}"#);
    }

    #[test]
    fn fault_encoding_falls_back_to_json() {
        let dispatcher = dispatcher();
        let fault = FaultResponse::new("RouteNotFound", "no route");
        let (format, body) = dispatcher.encode_fault(&fault, WireFormat::Xml);
        assert_eq!(format, WireFormat::Json);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["ResponseStatus"]["ErrorCode"], "RouteNotFound");
    }
}

//! Request, outcome and error types flowing through the dispatch pipeline.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use opwire_core::{EndpointAttributes, PathVariables, RestrictionRule, WireFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// InboundRequest
// ---------------------------------------------------------------------------

/// A transport-neutral inbound request handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Request path. A trailing query string is ignored by routing.
    pub path: String,
    /// Decoded query-string parameters, bound to request fields.
    pub query: Vec<(String, String)>,
    /// HTTP-style verb (`GET`, `POST`, ...).
    pub verb: String,
    /// Facts the transport knows about the request. May be partial: missing
    /// format and direction flags are resolved by the dispatcher.
    pub attributes: EndpointAttributes,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    /// Set when the caller registered for a correlated one-way reply.
    pub correlation_id: Option<Uuid>,
    /// Overrides `ServerConfig::default_operation_timeout_ms`.
    pub timeout: Option<Duration>,
    /// Dispatch straight to this operation, skipping route resolution.
    /// Used by message-queue deliveries.
    pub operation: Option<String>,
}

impl InboundRequest {
    #[must_use]
    pub fn new(verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            verb: verb.into(),
            attributes: EndpointAttributes::NONE,
            body: Bytes::new(),
            content_type: None,
            accept: None,
            correlation_id: None,
            timeout: None,
            operation: None,
        }
    }

    /// A request addressed to an operation by name rather than by path.
    #[must_use]
    pub fn for_operation(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut req = Self::new("POST", format!("/{name}"));
        req.operation = Some(name);
        req
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: EndpointAttributes) -> Self {
        self.attributes = self.attributes | attributes;
        self
    }

    #[must_use]
    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-request context handed to operation handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub call_id: u64,
    pub operation: String,
    /// Fully-resolved attributes: one direction, one format.
    pub attributes: EndpointAttributes,
    pub format: WireFormat,
    pub path_variables: PathVariables,
    pub correlation_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// DispatchOutcome
// ---------------------------------------------------------------------------

/// Successful result of dispatching one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Reply operation: serialized response body.
    Reply {
        operation: String,
        format: WireFormat,
        body: Bytes,
    },
    /// One-way operation executed; no response body.
    Accepted {
        operation: String,
        correlation_id: Option<Uuid>,
    },
}

impl DispatchOutcome {
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Reply { operation, .. } | Self::Accepted { operation, .. } => operation,
        }
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Reply { body, .. } => Some(body),
            Self::Accepted { .. } => None,
        }
    }
}

/// `Dispatch(request) -> DispatchResult`.
pub type DispatchResult = Result<DispatchOutcome, DispatchError>;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Machine-readable error codes surfaced in fault responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RouteNotFound,
    UnknownOperation,
    RestrictionViolation,
    SerializationFault,
    HandlerFault,
    TimedOut,
    Overloaded,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RouteNotFound => "RouteNotFound",
            Self::UnknownOperation => "UnknownOperation",
            Self::RestrictionViolation => "RestrictionViolation",
            Self::SerializationFault => "SerializationFault",
            Self::HandlerFault => "HandlerFault",
            Self::TimedOut => "TimedOut",
            Self::Overloaded => "Overloaded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status class a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCategory {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    ServerError,
    Unavailable,
    Timeout,
}

impl StatusCategory {
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::ServerError => 500,
            Self::Unavailable => 503,
            Self::Timeout => 504,
        }
    }

    #[must_use]
    pub const fn is_client_error(self) -> bool {
        matches!(
            self,
            Self::BadRequest | Self::Forbidden | Self::NotFound | Self::Conflict
        )
    }
}

/// Error type handlers return.
///
/// `Typed` opts into a client-visible error contract; `Fault` is logged in
/// full and surfaced to the client as a generic fault.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{code}: {message}")]
    Typed {
        status: StatusCategory,
        code: String,
        message: String,
    },
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl ServiceError {
    #[must_use]
    pub fn typed(status: StatusCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Typed {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::typed(StatusCategory::NotFound, "NotFound", message)
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::typed(StatusCategory::BadRequest, "BadRequest", message)
    }
}

/// Request-time dispatch failure. Every variant is recovered at the
/// dispatcher boundary and rendered as a [`FaultResponse`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no route matches {verb} {path}")]
    RouteNotFound { verb: String, path: String },
    #[error("unable to resolve operation '{name}'")]
    UnknownOperation { name: String },
    #[error("could not execute operation '{operation}', the following restrictions were not met: '{unmet}'")]
    RestrictionViolation {
        operation: String,
        rule: RestrictionRule,
        actual: EndpointAttributes,
        unmet: String,
    },
    #[error("serialization fault: {reason}")]
    SerializationFault {
        format: Option<WireFormat>,
        reason: String,
    },
    #[error("handler for '{operation}' failed: {source}")]
    HandlerFault {
        operation: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{code}: {message}")]
    Typed {
        operation: String,
        status: StatusCategory,
        code: String,
        message: String,
    },
    #[error("operation timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
}

/// Message shown to clients in place of handler fault details.
pub const GENERIC_FAULT_MESSAGE: &str = "An internal error occurred while processing the request";

impl DispatchError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RouteNotFound { .. } => ErrorKind::RouteNotFound,
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::RestrictionViolation { .. } => ErrorKind::RestrictionViolation,
            Self::SerializationFault { .. } => ErrorKind::SerializationFault,
            Self::HandlerFault { .. } | Self::Typed { .. } => ErrorKind::HandlerFault,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Overloaded => ErrorKind::Overloaded,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCategory {
        match self {
            Self::RouteNotFound { .. } | Self::UnknownOperation { .. } => StatusCategory::NotFound,
            Self::RestrictionViolation { .. } => StatusCategory::Forbidden,
            Self::SerializationFault { .. } => StatusCategory::BadRequest,
            Self::HandlerFault { .. } => StatusCategory::ServerError,
            Self::Typed { status, .. } => *status,
            Self::TimedOut { .. } => StatusCategory::Timeout,
            Self::Overloaded => StatusCategory::Unavailable,
        }
    }

    /// The operation the failure belongs to, when routing got that far.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::RestrictionViolation { operation, .. }
            | Self::HandlerFault { operation, .. }
            | Self::Typed { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Client-visible fault body. Handler faults never leak their cause.
    #[must_use]
    pub fn to_fault(&self) -> FaultResponse {
        match self {
            Self::Typed { code, message, .. } => FaultResponse::new(code.clone(), message.clone()),
            Self::HandlerFault { .. } => {
                FaultResponse::new(ErrorKind::HandlerFault.as_str(), GENERIC_FAULT_MESSAGE)
            }
            other => FaultResponse::new(other.kind().as_str(), other.to_string()),
        }
    }

    pub(crate) fn serialization(format: Option<WireFormat>, reason: impl fmt::Display) -> Self {
        Self::SerializationFault {
            format,
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// FaultResponse
// ---------------------------------------------------------------------------

/// Status block carried by every fault body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseStatus {
    pub error_code: String,
    pub message: String,
}

/// Structured fault body: `{"ResponseStatus":{"ErrorCode":..,"Message":..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaultResponse {
    pub response_status: ResponseStatus,
}

impl FaultResponse {
    #[must_use]
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response_status: ResponseStatus {
                error_code: error_code.into(),
                message: message.into(),
            },
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &str {
        &self.response_status.error_code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.response_status.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_fault_hides_cause_from_client() {
        let err = DispatchError::HandlerFault {
            operation: "GetCustomer".to_string(),
            source: anyhow::anyhow!("connection refused to db-01"),
        };
        let fault = err.to_fault();
        assert_eq!(fault.error_code(), "HandlerFault");
        assert_eq!(fault.message(), GENERIC_FAULT_MESSAGE);
        assert!(err.to_string().contains("db-01"));
        assert_eq!(err.status(), StatusCategory::ServerError);
    }

    #[test]
    fn typed_error_keeps_handler_code() {
        let err = DispatchError::Typed {
            operation: "GetCustomer".to_string(),
            status: StatusCategory::NotFound,
            code: "CustomerNotFound".to_string(),
            message: "no customer 9".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::HandlerFault);
        assert_eq!(err.status().http_status(), 404);
        let fault = err.to_fault();
        assert_eq!(fault.error_code(), "CustomerNotFound");
        assert_eq!(fault.message(), "no customer 9");
    }

    #[test]
    fn request_errors_are_client_errors() {
        let route = DispatchError::RouteNotFound {
            verb: "GET".to_string(),
            path: "/nope".to_string(),
        };
        assert!(route.status().is_client_error());
        assert_eq!(route.to_fault().error_code(), "RouteNotFound");

        let violation = DispatchError::RestrictionViolation {
            operation: "DeleteCustomer".to_string(),
            rule: RestrictionRule::all_of(EndpointAttributes::SECURE),
            actual: EndpointAttributes::IN_SECURE,
            unmet: "-[Secure]".to_string(),
        };
        assert_eq!(violation.status(), StatusCategory::Forbidden);
        assert!(violation.to_fault().message().contains("-[Secure]"));
    }

    #[test]
    fn fault_response_wire_shape() {
        let fault = FaultResponse::new("RouteNotFound", "no route");
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ResponseStatus": {"ErrorCode": "RouteNotFound", "Message": "no route"}})
        );
    }

    #[test]
    fn inbound_request_builder() {
        let id = Uuid::new_v4();
        let req = InboundRequest::new("POST", "/customers")
            .with_attributes(EndpointAttributes::SECURE)
            .with_body("application/json", r#"{"Name":"Ada"}"#)
            .with_correlation(id);
        assert_eq!(req.content_type.as_deref(), Some("application/json"));
        assert_eq!(req.correlation_id, Some(id));
        assert!(req.attributes.is_secure());

        let direct = InboundRequest::for_operation("StoreCustomer");
        assert_eq!(direct.operation.as_deref(), Some("StoreCustomer"));
    }
}

//! Fallback handler: every request not claimed by a fixed route is
//! translated into an [`InboundRequest`] and run through the dispatch
//! pipeline.

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use opwire_core::{EndpointAttributes, WireFormat};
use tower::ServiceExt;
use tracing::debug;

use super::AppState;
use crate::service::{
    DispatchError, DispatchOutcome, FaultResponse, InboundRequest, StatusCategory,
};

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Dispatches any request to the operation its path and method resolve to.
///
/// Replies answer `200` with the encoded body, one-way operations `202`
/// with no body, and faults the status of their category with an encoded
/// [`FaultResponse`].
pub async fn dispatch_handler(State(state): State<AppState>, request: Request) -> Response {
    if !state.shutdown.is_accepting() {
        return fault_response(&state, &DispatchError::Overloaded, None);
    }
    let _in_flight = state.shutdown.in_flight_guard();

    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let attributes = transport_attributes(&state, &parts.headers, parts.method.as_str(), peer);
    let content_type = header_str(&parts.headers, CONTENT_TYPE.as_str());
    let accept = header_str(&parts.headers, ACCEPT.as_str());
    let preferred = Some(state.dispatcher.negotiate_accept(accept.as_deref()));

    let query = match Query::<Vec<(String, String)>>::try_from_uri(&parts.uri) {
        Ok(Query(pairs)) => pairs,
        Err(err) => {
            let err = DispatchError::SerializationFault {
                format: None,
                reason: format!("invalid query string: {err}"),
            };
            return fault_response(&state, &err, preferred);
        }
    };

    let body = match axum::body::to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(error = %err, "failed to read request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut inbound = InboundRequest::new(parts.method.as_str(), parts.uri.path())
        .with_attributes(attributes)
        .with_query(query);
    inbound.body = body;
    inbound.content_type = content_type;
    inbound.accept = accept;

    match state.pipeline.clone().oneshot(inbound).await {
        Ok(DispatchOutcome::Reply { format, body, .. }) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
            response
        }
        Ok(DispatchOutcome::Accepted { .. }) => StatusCode::ACCEPTED.into_response(),
        Err(err) => fault_response(&state, &err, preferred),
    }
}

/// Verb, channel security and network origin as seen by the transport.
/// Format and direction are left to the dispatcher.
fn transport_attributes(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    peer: Option<IpAddr>,
) -> EndpointAttributes {
    let mut attributes = EndpointAttributes::from_http_method(method).unwrap_or_default();

    let forwarded_https = state.config.trust_forwarded_proto
        && header_str(headers, X_FORWARDED_PROTO)
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
    attributes |= if state.config.tls.is_some() || forwarded_https {
        EndpointAttributes::SECURE
    } else {
        EndpointAttributes::IN_SECURE
    };

    attributes |= if peer.is_some_and(is_internal) {
        EndpointAttributes::INTERNAL
    } else {
        EndpointAttributes::EXTERNAL
    };
    attributes
}

/// Loopback, private and link-local peers count as internal.
fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn fault_response(
    state: &AppState,
    err: &DispatchError,
    preferred: Option<WireFormat>,
) -> Response {
    let preferred = preferred.unwrap_or(state.dispatcher.config().default_format);
    let fault: FaultResponse = err.to_fault();
    let (format, body) = state.dispatcher.encode_fault(&fault, preferred);

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status_code(err.status());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    response
}

fn status_code(category: StatusCategory) -> StatusCode {
    StatusCode::from_u16(category.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

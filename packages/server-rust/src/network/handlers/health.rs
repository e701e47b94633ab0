//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Detailed health as JSON.
///
/// Always 200; the `state` field tells a draining server from a healthy one.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let dispatcher = &state.dispatcher;

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "node_id": dispatcher.config().node_id,
        "operations": dispatcher.registry().len(),
        "in_flight": state.shutdown.in_flight_count(),
        "pending_correlations": dispatcher.correlator().pending_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe. 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when ready, 503 while starting, draining or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.is_accepting() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_support::customer_state;
    use crate::network::NetworkConfig;

    #[tokio::test]
    async fn health_reports_registry_and_drain_state() {
        let (state, _) = customer_state(NetworkConfig::default());
        let _guard = state.shutdown.in_flight_guard();

        let json = health_handler(State(state.clone())).await.0;
        assert_eq!(json["state"], "ready");
        assert_eq!(json["operations"], 4);
        assert_eq!(json["in_flight"], 1);
        assert_eq!(json["pending_correlations"], 0);
        assert!(json["uptime_secs"].is_number());

        state.shutdown.trigger_shutdown();
        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "draining");
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let (state, _) = customer_state(NetworkConfig::default());
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

//! Operation listing for clients and operators.

use axum::extract::{Query, State};
use axum::Json;
use opwire_core::WireFormat;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::service::RouteSource;

#[derive(Debug, Default, Deserialize)]
pub struct MetadataQuery {
    /// Restrict the name lists to operations reachable in this format.
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OperationMetadata {
    pub name: String,
    pub direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_type: Option<String>,
    pub restriction: String,
    pub routes: Vec<RouteMetadata>,
}

#[derive(Debug, Serialize)]
pub struct RouteMetadata {
    pub template: String,
    pub source: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub format: WireFormat,
    pub reply: Vec<String>,
    pub one_way: Vec<String>,
    pub operations: Vec<OperationMetadata>,
}

/// `GET /metadata`: every registered operation with its routes and rule.
pub async fn metadata_handler(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Json<MetadataResponse> {
    let dispatcher = &state.dispatcher;
    let registry = dispatcher.registry();
    let format = query
        .format
        .as_deref()
        .and_then(WireFormat::from_path_name)
        .unwrap_or(dispatcher.config().default_format);

    let routes = dispatcher.routes().routes();
    let operations = registry
        .operations()
        .map(|op| OperationMetadata {
            name: op.name().to_string(),
            direction: op.direction().as_str(),
            reply_type: op.reply_type(),
            restriction: op.restriction().to_string(),
            routes: routes
                .iter()
                .filter(|(name, _, _)| *name == op.name())
                .map(|(_, template, source)| RouteMetadata {
                    template: template.clone(),
                    source: match source {
                        RouteSource::Explicit => "explicit",
                        RouteSource::Inferred => "inferred",
                        RouteSource::Predefined => "predefined",
                    },
                })
                .collect(),
        })
        .collect();

    Json(MetadataResponse {
        format,
        reply: to_owned(registry.reply_operation_names(format)),
        one_way: to_owned(registry.one_way_operation_names(format)),
        operations,
    })
}

fn to_owned(names: Vec<&str>) -> Vec<String> {
    names.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_support::customer_state;
    use crate::network::NetworkConfig;

    #[tokio::test]
    async fn lists_operations_with_routes() {
        let (state, _) = customer_state(NetworkConfig::default());
        let response = metadata_handler(State(state), Query(MetadataQuery::default()))
            .await
            .0;

        assert_eq!(response.format, WireFormat::Json);
        assert_eq!(response.reply, vec!["GetCustomer", "SearchCustomers"]);
        assert_eq!(response.one_way, vec!["StoreCustomer", "DeleteCustomer"]);

        let store = response
            .operations
            .iter()
            .find(|op| op.name == "StoreCustomer")
            .unwrap();
        assert_eq!(store.direction, "OneWay");
        assert!(store.reply_type.is_none());
        assert_eq!(store.routes.len(), 2);
        assert!(store.routes.iter().all(|r| r.source == "explicit"));

        let delete = response
            .operations
            .iter()
            .find(|op| op.name == "DeleteCustomer")
            .unwrap();
        assert_eq!(delete.restriction, "[Secure] OR [Internal]");
    }
}

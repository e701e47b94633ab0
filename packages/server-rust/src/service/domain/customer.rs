//! Customer CRUD over a [`PersistenceProvider`].
//!
//! | Operation         | Routes                                     | Direction |
//! |-------------------|--------------------------------------------|-----------|
//! | `GetCustomer`     | `GET /customers/{Id}`                      | reply     |
//! | `SearchCustomers` | `GET /customers`                           | reply     |
//! | `StoreCustomer`   | `POST /customers`, `PUT /customers/{Id}`   | one-way   |
//! | `DeleteCustomer`  | `DELETE /customers/{Id}`                   | one-way   |
//!
//! `DeleteCustomer` is only reachable over a secure channel or from the
//! internal network.

use std::sync::Arc;

use async_trait::async_trait;
use opwire_core::{EndpointAttributes, FieldKind, OperationDescriptor, RestrictionRule};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::service::handler::OperationHandler;
use crate::service::operation::{RequestContext, ServiceError};
use crate::service::registry::{RegistryError, ServiceRegistry};
use crate::traits::{Entity, PersistenceExt, PersistenceProvider};

// ---------------------------------------------------------------------------
// Entity and DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Entity for Customer {
    const COLLECTION: &'static str = "customers";

    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetCustomer {
    pub id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomerResponse {
    pub customer: Customer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SearchCustomers {
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchCustomersResponse {
    pub results: Vec<Customer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoreCustomer {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteCustomer {
    pub id: i64,
}

// ---------------------------------------------------------------------------
// CustomerService
// ---------------------------------------------------------------------------

/// Handles every customer operation against one persistence provider.
#[derive(Clone)]
pub struct CustomerService {
    store: Arc<dyn PersistenceProvider>,
}

impl CustomerService {
    #[must_use]
    pub fn new(store: Arc<dyn PersistenceProvider>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler<GetCustomer> for CustomerService {
    type Response = CustomerResponse;

    async fn handle(
        &self,
        request: GetCustomer,
        _ctx: &RequestContext,
    ) -> Result<CustomerResponse, ServiceError> {
        let customer = self
            .store
            .get_entity::<Customer>(&request.id.to_string())
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("customer {} not found", request.id)))?;
        Ok(CustomerResponse { customer })
    }
}

#[async_trait]
impl OperationHandler<SearchCustomers> for CustomerService {
    type Response = SearchCustomersResponse;

    async fn handle(
        &self,
        request: SearchCustomers,
        _ctx: &RequestContext,
    ) -> Result<SearchCustomersResponse, ServiceError> {
        let results = match request.name {
            Some(name) => {
                self.store
                    .find_typed::<Customer>("Name", &Value::String(name))
                    .await?
            }
            None => self.store.get_all_typed::<Customer>().await?,
        };
        Ok(SearchCustomersResponse { results })
    }
}

#[async_trait]
impl OperationHandler<StoreCustomer> for CustomerService {
    type Response = ();

    async fn handle(&self, request: StoreCustomer, ctx: &RequestContext) -> Result<(), ServiceError> {
        let Some(id) = request.id else {
            return Err(ServiceError::bad_request("Id is required"));
        };
        if request.name.trim().is_empty() {
            return Err(ServiceError::bad_request("Name must not be empty"));
        }
        let customer = Customer {
            id,
            name: request.name,
            email: request.email,
        };
        self.store.save_entity(&customer).await?;
        debug!(call_id = ctx.call_id, customer = id, "stored customer");
        Ok(())
    }
}

#[async_trait]
impl OperationHandler<DeleteCustomer> for CustomerService {
    type Response = ();

    async fn handle(&self, request: DeleteCustomer, ctx: &RequestContext) -> Result<(), ServiceError> {
        let existed = self
            .store
            .delete_entity::<Customer>(&request.id.to_string())
            .await?;
        debug!(call_id = ctx.call_id, customer = request.id, existed, "deleted customer");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Registers the customer operations on `registry`.
///
/// # Errors
///
/// Returns the first [`RegistryError`] raised by a registration.
pub fn register_customer_service(
    registry: &mut ServiceRegistry,
    store: Arc<dyn PersistenceProvider>,
) -> Result<(), RegistryError> {
    let service = CustomerService::new(store);

    registry.register::<GetCustomer, _>(
        OperationDescriptor::new("GetCustomer")
            .returns("CustomerResponse")
            .route("/customers/{Id}", Some("GET"))
            .field("Id", FieldKind::Integer),
        service.clone(),
    )?;
    registry.register::<SearchCustomers, _>(
        OperationDescriptor::new("SearchCustomers")
            .returns("SearchCustomersResponse")
            .route("/customers", Some("GET"))
            .field("Name", FieldKind::String),
        service.clone(),
    )?;
    registry.register::<StoreCustomer, _>(
        OperationDescriptor::new("StoreCustomer")
            .route("/customers", Some("POST"))
            .route("/customers/{Id}", Some("PUT"))
            .field("Id", FieldKind::Integer)
            .field("Name", FieldKind::String)
            .field("Email", FieldKind::String),
        service.clone(),
    )?;
    registry.register::<DeleteCustomer, _>(
        OperationDescriptor::new("DeleteCustomer")
            .route("/customers/{Id}", Some("DELETE"))
            .field("Id", FieldKind::Integer)
            .restrict(RestrictionRule::any_of([
                EndpointAttributes::SECURE,
                EndpointAttributes::INTERNAL,
            ])),
        service,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use opwire_core::{Direction, WireFormat};
    use serde_json::json;

    use super::*;
    use crate::service::config::ServerConfig;
    use crate::service::dispatcher::RequestDispatcher;
    use crate::service::operation::{DispatchError, DispatchOutcome, InboundRequest, StatusCategory};
    use crate::storage::InMemoryPersistence;

    const EXTERNAL_HTTPS: EndpointAttributes = EndpointAttributes::SECURE.combine(EndpointAttributes::EXTERNAL);
    const EXTERNAL_HTTP: EndpointAttributes = EndpointAttributes::IN_SECURE.combine(EndpointAttributes::EXTERNAL);

    fn setup() -> (InMemoryPersistence, RequestDispatcher) {
        let store = InMemoryPersistence::new();
        let mut registry = ServiceRegistry::new();
        register_customer_service(&mut registry, Arc::new(store.clone())).unwrap();
        let dispatcher = RequestDispatcher::from_registry(registry, ServerConfig::default()).unwrap();
        (store, dispatcher)
    }

    fn reply_json(outcome: DispatchOutcome) -> Value {
        match outcome {
            DispatchOutcome::Reply { body, .. } => serde_json::from_slice(&body).unwrap(),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn directions_follow_operation_names() {
        let mut registry = ServiceRegistry::new();
        register_customer_service(&mut registry, Arc::new(InMemoryPersistence::new())).unwrap();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get("getcustomer").unwrap().direction(), Direction::Reply);
        assert_eq!(registry.get("StoreCustomer").unwrap().direction(), Direction::OneWay);
        assert_eq!(registry.get("DeleteCustomer").unwrap().direction(), Direction::OneWay);
        assert_eq!(
            registry.reply_operation_names(WireFormat::Json),
            vec!["GetCustomer", "SearchCustomers"]
        );
    }

    #[tokio::test]
    async fn store_then_get() {
        let (store, dispatcher) = setup();

        let outcome = dispatcher
            .dispatch(
                InboundRequest::new("PUT", "/customers/7")
                    .with_attributes(EXTERNAL_HTTP)
                    .with_body("application/json", r#"{"Name":"Ada","Email":"ada@example.com"}"#),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Accepted { .. }));
        assert_eq!(store.count("customers"), 1);

        let outcome = dispatcher
            .dispatch(InboundRequest::new("GET", "/customers/7").with_attributes(EXTERNAL_HTTP))
            .await
            .unwrap();
        assert_eq!(
            reply_json(outcome),
            json!({"Customer": {"Id": 7, "Name": "Ada", "Email": "ada@example.com"}})
        );
    }

    #[tokio::test]
    async fn missing_customer_is_not_found() {
        let (_, dispatcher) = setup();
        let err = dispatcher
            .dispatch(InboundRequest::new("GET", "/customers/404").with_attributes(EXTERNAL_HTTP))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCategory::NotFound);
        assert_eq!(err.to_fault().error_code(), "NotFound");
    }

    #[tokio::test]
    async fn post_without_id_is_rejected() {
        let (store, dispatcher) = setup();
        let err = dispatcher
            .dispatch(
                InboundRequest::new("POST", "/customers")
                    .with_attributes(EXTERNAL_HTTP)
                    .with_body("application/json", r#"{"Name":"Grace"}"#),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCategory::BadRequest);
        assert_eq!(store.count("customers"), 0);
    }

    #[tokio::test]
    async fn search_filters_by_name() {
        let (store, dispatcher) = setup();
        for (id, name) in [(1, "Ada"), (2, "Grace"), (3, "Ada")] {
            store
                .save_entity(&Customer {
                    id,
                    name: name.to_string(),
                    email: None,
                })
                .await
                .unwrap();
        }

        let all = reply_json(
            dispatcher
                .dispatch(InboundRequest::new("GET", "/customers").with_attributes(EXTERNAL_HTTP))
                .await
                .unwrap(),
        );
        assert_eq!(all["Results"].as_array().unwrap().len(), 3);

        let adas = reply_json(
            dispatcher
                .dispatch(
                    InboundRequest::new("GET", "/customers")
                        .with_attributes(EXTERNAL_HTTP)
                        .with_body("application/json", r#"{"Name":"Ada"}"#),
                )
                .await
                .unwrap(),
        );
        assert_eq!(adas["Results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_requires_secure_or_internal() {
        let (store, dispatcher) = setup();
        store
            .save_entity(&Customer {
                id: 1,
                name: "Ada".to_string(),
                email: None,
            })
            .await
            .unwrap();

        let err = dispatcher
            .dispatch(InboundRequest::new("DELETE", "/customers/1").with_attributes(EXTERNAL_HTTP))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::RestrictionViolation { .. }));
        assert_eq!(store.count("customers"), 1);

        let outcome = dispatcher
            .dispatch(InboundRequest::new("DELETE", "/customers/1").with_attributes(EXTERNAL_HTTPS))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Accepted { .. }));
        assert_eq!(store.count("customers"), 0);
    }
}

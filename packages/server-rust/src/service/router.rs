//! Route resolution: maps `(path, verb)` to a registered operation.
//!
//! Three strategies are tried in order:
//!
//! 1. **Explicit** templates declared on operation descriptors.
//! 2. **Inferred** templates produced by [`RouteInference`] strategies for
//!    operations that declare no routes.
//! 3. **Predefined** endpoints `/{format}/reply/{Operation}` and
//!    `/{format}/oneway/{Operation}` (plus the legacy `syncreply` and
//!    `asynconeway` spellings), which also fix the request's format and
//!    direction.
//!
//! The table is compiled once from a frozen [`ServiceRegistry`] and is
//! read-only afterwards.

use std::collections::HashMap;

use opwire_core::{
    split_path, Direction, OperationDescriptor, PathVariables, RouteTemplate, TemplateMatch,
    WireFormat,
};
use tracing::debug;

use super::operation::DispatchError;
use super::registry::{RegistryError, ServiceRegistry};

// ---------------------------------------------------------------------------
// Inference strategies
// ---------------------------------------------------------------------------

/// Convention-based route inference for operations without explicit routes.
///
/// Implemented for closures `Fn(&OperationDescriptor) -> Option<String>`.
pub trait RouteInference: Send + Sync {
    /// Returns a route template for `operation`, or `None` to defer to the
    /// next strategy.
    fn try_infer(&self, operation: &OperationDescriptor) -> Option<String>;
}

impl<F> RouteInference for F
where
    F: Fn(&OperationDescriptor) -> Option<String> + Send + Sync,
{
    fn try_infer(&self, operation: &OperationDescriptor) -> Option<String> {
        self(operation)
    }
}

/// Metadata `key = Field` produces `/{name-lowercase}/{Field}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyAttributeInference;

impl RouteInference for KeyAttributeInference {
    fn try_infer(&self, operation: &OperationDescriptor) -> Option<String> {
        let key = operation.meta_value("key")?.trim();
        if key.is_empty() {
            return None;
        }
        Some(format!(
            "/{}/{{{key}}}",
            operation.name().to_ascii_lowercase()
        ))
    }
}

/// Every operation is reachable at `/{name-lowercase}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameInference;

impl RouteInference for NameInference {
    fn try_infer(&self, operation: &OperationDescriptor) -> Option<String> {
        Some(format!("/{}", operation.name().to_ascii_lowercase()))
    }
}

// ---------------------------------------------------------------------------
// RouteMatch
// ---------------------------------------------------------------------------

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Explicit,
    Inferred,
    Predefined,
}

/// Format and direction fixed by a predefined endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredefinedEndpoint {
    pub format: WireFormat,
    pub direction: Direction,
}

/// Result of resolving a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Canonical (registered) operation name.
    pub operation: String,
    pub path_variables: PathVariables,
    pub endpoint: Option<PredefinedEndpoint>,
    pub source: RouteSource,
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledRoute {
    operation: String,
    template: RouteTemplate,
    /// Global registration order, used to break score ties.
    order: usize,
}

/// Templates bucketed by segment count; wildcard templates are scanned for
/// every path.
#[derive(Debug, Default)]
struct RouteTable {
    fixed: HashMap<usize, Vec<CompiledRoute>>,
    wildcard: Vec<CompiledRoute>,
}

impl RouteTable {
    fn insert(&mut self, route: CompiledRoute) {
        if route.template.has_wildcard() {
            self.wildcard.push(route);
        } else {
            self.fixed
                .entry(route.template.segment_count())
                .or_default()
                .push(route);
        }
    }

    fn len(&self) -> usize {
        self.fixed.values().map(Vec::len).sum::<usize>() + self.wildcard.len()
    }

    fn find(&self, verb: &str, parts: &[&str]) -> Option<(&CompiledRoute, PathVariables)> {
        let candidates = self
            .fixed
            .get(&parts.len())
            .into_iter()
            .flatten()
            .chain(self.wildcard.iter());

        let mut best: Option<(&CompiledRoute, TemplateMatch)> = None;
        for route in candidates {
            let Some(found) = route.template.match_path(verb, parts) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, current_match)) => {
                    found.score > current_match.score
                        || (found.score == current_match.score && route.order < current.order)
                }
            };
            if better {
                best = Some((route, found));
            }
        }
        best.map(|(route, found)| (route, found.variables))
    }

    fn iter(&self) -> impl Iterator<Item = &CompiledRoute> {
        self.fixed.values().flatten().chain(self.wildcard.iter())
    }
}

// ---------------------------------------------------------------------------
// RouteResolver
// ---------------------------------------------------------------------------

/// Resolves request paths against explicit, inferred and predefined routes.
#[derive(Debug)]
pub struct RouteResolver {
    explicit: RouteTable,
    inferred: RouteTable,
    /// Lower-cased operation name to canonical name.
    names: HashMap<String, String>,
    predefined: bool,
}

impl RouteResolver {
    #[must_use]
    pub fn builder() -> RouteResolverBuilder {
        RouteResolverBuilder::default()
    }

    /// Compiles a resolver with the default strategies.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidRoute` if an inferred template does not
    /// parse.
    pub fn from_registry(registry: &ServiceRegistry) -> Result<Self, RegistryError> {
        Self::builder().build(registry)
    }

    /// Resolves a request path and verb to an operation.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::RouteNotFound` when no strategy matches.
    pub fn resolve(&self, path: &str, verb: &str) -> Result<RouteMatch, DispatchError> {
        let path = path.split('?').next().unwrap_or_default();
        let parts = split_path(path);

        if let Some((route, path_variables)) = self.explicit.find(verb, &parts) {
            return Ok(RouteMatch {
                operation: route.operation.clone(),
                path_variables,
                endpoint: None,
                source: RouteSource::Explicit,
            });
        }

        if let Some((route, path_variables)) = self.inferred.find(verb, &parts) {
            return Ok(RouteMatch {
                operation: route.operation.clone(),
                path_variables,
                endpoint: None,
                source: RouteSource::Inferred,
            });
        }

        if self.predefined {
            if let Some(found) = self.match_predefined(&parts) {
                return Ok(found);
            }
        }

        Err(DispatchError::RouteNotFound {
            verb: verb.to_string(),
            path: path.to_string(),
        })
    }

    fn match_predefined(&self, parts: &[&str]) -> Option<RouteMatch> {
        let [format, kind, name] = parts else {
            return None;
        };
        let format = WireFormat::from_path_name(format)?;
        let direction = match kind.to_ascii_lowercase().as_str() {
            "reply" | "syncreply" => Direction::Reply,
            "oneway" | "asynconeway" => Direction::OneWay,
            _ => return None,
        };
        let operation = self.names.get(&name.to_ascii_lowercase())?;
        Some(RouteMatch {
            operation: operation.clone(),
            path_variables: PathVariables::new(),
            endpoint: Some(PredefinedEndpoint { format, direction }),
            source: RouteSource::Predefined,
        })
    }

    /// `(operation, template)` pairs for every compiled route, explicit first.
    #[must_use]
    pub fn routes(&self) -> Vec<(&str, String, RouteSource)> {
        let mut out: Vec<_> = self
            .explicit
            .iter()
            .map(|r| (r.operation.as_str(), r.template.to_string(), RouteSource::Explicit, r.order))
            .chain(
                self.inferred
                    .iter()
                    .map(|r| (r.operation.as_str(), r.template.to_string(), RouteSource::Inferred, r.order)),
            )
            .collect();
        out.sort_by_key(|(_, _, source, order)| (*source != RouteSource::Explicit, *order));
        out.into_iter()
            .map(|(op, template, source, _)| (op, template, source))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures the inference strategies and predefined endpoints of a
/// [`RouteResolver`].
pub struct RouteResolverBuilder {
    strategies: Vec<Box<dyn RouteInference>>,
    predefined: bool,
}

impl Default for RouteResolverBuilder {
    fn default() -> Self {
        Self {
            strategies: vec![Box::new(KeyAttributeInference)],
            predefined: true,
        }
    }
}

impl RouteResolverBuilder {
    /// Appends an inference strategy. Strategies run in insertion order.
    #[must_use]
    pub fn strategy(mut self, strategy: impl RouteInference + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Drops all strategies, including the default key-attribute one.
    #[must_use]
    pub fn without_strategies(mut self) -> Self {
        self.strategies.clear();
        self
    }

    #[must_use]
    pub fn predefined_routes(mut self, enabled: bool) -> Self {
        self.predefined = enabled;
        self
    }

    /// Compiles the route table for `registry`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidRoute` if an inferred template does not
    /// parse.
    pub fn build(self, registry: &ServiceRegistry) -> Result<RouteResolver, RegistryError> {
        let mut explicit = RouteTable::default();
        let mut inferred = RouteTable::default();
        let mut names = HashMap::with_capacity(registry.len());
        let mut order = 0usize;

        for op in registry.operations() {
            names.insert(op.name().to_ascii_lowercase(), op.name().to_string());

            if !op.routes().is_empty() {
                for template in op.routes() {
                    explicit.insert(CompiledRoute {
                        operation: op.name().to_string(),
                        template: template.clone(),
                        order,
                    });
                    order += 1;
                }
                continue;
            }

            let Some(path) = self
                .strategies
                .iter()
                .find_map(|s| s.try_infer(op.descriptor()))
            else {
                continue;
            };
            let template =
                RouteTemplate::parse(&path, None).map_err(|source| RegistryError::InvalidRoute {
                    operation: op.name().to_string(),
                    source,
                })?;
            debug!(operation = op.name(), route = %template, "inferred route");
            inferred.insert(CompiledRoute {
                operation: op.name().to_string(),
                template,
                order,
            });
            order += 1;
        }

        debug!(
            explicit = explicit.len(),
            inferred = inferred.len(),
            predefined = self.predefined,
            "route table compiled"
        );

        Ok(RouteResolver {
            explicit,
            inferred,
            names,
            predefined: self.predefined,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::service::handler::OperationHandler;
    use crate::service::operation::{RequestContext, ServiceError};

    #[derive(Debug, Deserialize)]
    struct Empty {}

    struct Noop;

    #[async_trait]
    impl OperationHandler<Empty> for Noop {
        type Response = ();

        async fn handle(&self, _request: Empty, _ctx: &RequestContext) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn registry(ops: Vec<OperationDescriptor>) -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        for op in ops {
            registry.register(op, Noop).unwrap();
        }
        registry
    }

    #[test]
    fn explicit_template_binds_variables() {
        let registry = registry(vec![
            OperationDescriptor::new("GetCustomer").route("/customers/{id}", Some("GET")),
        ]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();

        let found = resolver.resolve("/customers/42", "GET").unwrap();
        assert_eq!(found.operation, "GetCustomer");
        assert_eq!(found.path_variables.get("id").map(String::as_str), Some("42"));
        assert_eq!(found.source, RouteSource::Explicit);
    }

    #[test]
    fn extra_segments_do_not_match() {
        let registry = registry(vec![
            OperationDescriptor::new("GetCustomer").route("/customers/{id}", None),
        ]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();

        let err = resolver.resolve("/customers/42/extra", "GET").unwrap_err();
        assert!(matches!(err, DispatchError::RouteNotFound { .. }));
    }

    #[test]
    fn verb_restriction_is_honoured() {
        let registry = registry(vec![
            OperationDescriptor::new("GetCustomer").route("/customers/{id}", Some("GET")),
        ]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();
        assert!(resolver.resolve("/customers/1", "DELETE").is_err());
    }

    #[test]
    fn more_specific_template_wins_then_first_registered() {
        let registry = registry(vec![
            OperationDescriptor::new("GetCustomer").route("/customers/{id}", None),
            OperationDescriptor::new("ListVipCustomers").route("/customers/vip", None),
            OperationDescriptor::new("FindCustomer").route("/customers/{name}", None),
        ]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();

        assert_eq!(
            resolver.resolve("/customers/vip", "GET").unwrap().operation,
            "ListVipCustomers"
        );
        assert_eq!(
            resolver.resolve("/customers/7", "GET").unwrap().operation,
            "GetCustomer"
        );
    }

    #[test]
    fn literals_are_case_insensitive() {
        let registry = registry(vec![
            OperationDescriptor::new("GetCustomer").route("/Customers/{Id}", None),
        ]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();
        let found = resolver.resolve("/CUSTOMERS/9", "GET").unwrap();
        assert_eq!(found.path_variables.get("Id").map(String::as_str), Some("9"));
    }

    #[test]
    fn key_metadata_infers_route() {
        let registry = registry(vec![OperationDescriptor::new("GetCustomer").meta("key", "Id")]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();

        let found = resolver.resolve("/getcustomer/7", "GET").unwrap();
        assert_eq!(found.operation, "GetCustomer");
        assert_eq!(found.source, RouteSource::Inferred);
        assert_eq!(found.path_variables.get("Id").map(String::as_str), Some("7"));
    }

    #[test]
    fn first_strategy_with_a_result_wins() {
        let registry = registry(vec![OperationDescriptor::new("ListOrders")]);
        let resolver = RouteResolver::builder()
            .strategy(|op: &OperationDescriptor| {
                op.name()
                    .strip_prefix("List")
                    .map(|rest| format!("/{}", rest.to_ascii_lowercase()))
            })
            .strategy(NameInference)
            .build(&registry)
            .unwrap();

        assert_eq!(resolver.resolve("/orders", "GET").unwrap().operation, "ListOrders");
        assert!(resolver.resolve("/listorders", "GET").is_err());
    }

    #[test]
    fn explicit_routes_suppress_inference() {
        let registry = registry(vec![
            OperationDescriptor::new("GetCustomer")
                .route("/customer/{Id}", None)
                .meta("key", "Id"),
        ]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();
        assert!(resolver.resolve("/getcustomer/7", "GET").is_err());
        assert_eq!(resolver.routes().len(), 1);
    }

    #[test]
    fn predefined_endpoints_fix_format_and_direction() {
        let registry = registry(vec![OperationDescriptor::new("StoreCustomer")]);
        let resolver = RouteResolver::from_registry(&registry).unwrap();

        let found = resolver.resolve("/json/reply/storecustomer", "POST").unwrap();
        assert_eq!(found.operation, "StoreCustomer");
        assert_eq!(
            found.endpoint,
            Some(PredefinedEndpoint {
                format: WireFormat::Json,
                direction: Direction::Reply,
            })
        );

        let legacy = resolver.resolve("/msgpack/asynconeway/StoreCustomer", "POST").unwrap();
        assert_eq!(
            legacy.endpoint,
            Some(PredefinedEndpoint {
                format: WireFormat::MsgPack,
                direction: Direction::OneWay,
            })
        );

        assert!(resolver.resolve("/csv/reply/StoreCustomer", "POST").is_err());
        assert!(resolver.resolve("/json/reply/Unknown", "POST").is_err());
    }

    #[test]
    fn predefined_endpoints_can_be_disabled() {
        let registry = registry(vec![OperationDescriptor::new("StoreCustomer")]);
        let resolver = RouteResolver::builder()
            .predefined_routes(false)
            .build(&registry)
            .unwrap();
        assert!(resolver.resolve("/json/reply/StoreCustomer", "POST").is_err());
    }
}

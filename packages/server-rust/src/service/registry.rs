//! Operation registry: maps operation names to descriptors and handlers.
//!
//! The registry is populated during startup through `&mut self` and then
//! frozen behind an `Arc`; request-time lookups never take a lock.

use std::collections::HashMap;
use std::sync::Arc;

use opwire_core::{
    Direction, DirectionSource, OperationDescriptor, RestrictionRule, RouteTemplate,
    RouteTemplateError, WireFormat,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::handler::{ErasedHandler, OperationHandler, TypedHandler};
use super::operation::DispatchError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Startup-time registration failure.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("could not register operation '{name}': it is already registered and each operation can only have one handler")]
    DuplicateOperation { name: String },
    #[error("invalid route on operation '{operation}': {source}")]
    InvalidRoute {
        operation: String,
        #[source]
        source: RouteTemplateError,
    },
    #[error("operation '{name}' declares no direction and its name starts with no known verb")]
    UnclassifiedOperation { name: String },
}

// ---------------------------------------------------------------------------
// RegisteredOperation
// ---------------------------------------------------------------------------

/// One registered operation with its resolved direction and compiled routes.
pub struct RegisteredOperation {
    descriptor: OperationDescriptor,
    direction: Direction,
    direction_source: DirectionSource,
    routes: Vec<RouteTemplate>,
    handler: Arc<dyn ErasedHandler>,
}

impl RegisteredOperation {
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    #[must_use]
    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn direction_source(&self) -> DirectionSource {
        self.direction_source
    }

    #[must_use]
    pub fn reply_type(&self) -> Option<String> {
        self.descriptor.reply_type()
    }

    #[must_use]
    pub fn restriction(&self) -> &RestrictionRule {
        self.descriptor.restriction()
    }

    /// Explicit routes declared on the descriptor, compiled.
    #[must_use]
    pub fn routes(&self) -> &[RouteTemplate] {
        &self.routes
    }

    pub(crate) fn handler(&self) -> &dyn ErasedHandler {
        self.handler.as_ref()
    }
}

impl std::fmt::Debug for RegisteredOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredOperation")
            .field("name", &self.name())
            .field("direction", &self.direction)
            .field("routes", &self.routes.len())
            .field("restriction", self.restriction())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry of operations keyed by case-insensitive name.
///
/// Operations keep their registration order, which route resolution uses to
/// break ties between templates.
#[derive(Default)]
pub struct ServiceRegistry {
    operations: Vec<RegisteredOperation>,
    by_name: HashMap<String, usize>,
    strict_verb_inference: bool,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects operations whose direction is neither declared nor inferable
    /// from a verb prefix, instead of defaulting them to reply.
    #[must_use]
    pub fn with_strict_verb_inference(mut self, strict: bool) -> Self {
        self.strict_verb_inference = strict;
        self
    }

    /// Registers an operation handled by `handler`, whose request DTO is `Req`.
    ///
    /// # Errors
    ///
    /// - `DuplicateOperation` if the name (case-insensitive) is taken.
    /// - `InvalidRoute` if an explicit route template does not parse.
    /// - `UnclassifiedOperation` in strict mode when the direction cannot be
    ///   resolved.
    pub fn register<Req, H>(
        &mut self,
        descriptor: OperationDescriptor,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        Req: DeserializeOwned + Send + 'static,
        H: OperationHandler<Req>,
    {
        let name = descriptor.name().to_string();
        let key = name.to_ascii_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(RegistryError::DuplicateOperation { name });
        }

        let (direction, direction_source) = descriptor.direction_with_source();
        if direction_source == DirectionSource::Default {
            if self.strict_verb_inference {
                return Err(RegistryError::UnclassifiedOperation { name });
            }
            warn!(
                operation = %name,
                "operation name starts with no known verb, defaulting to reply"
            );
        }

        let routes = descriptor
            .routes()
            .iter()
            .map(opwire_core::RouteSpec::compile)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| RegistryError::InvalidRoute {
                operation: name.clone(),
                source,
            })?;

        debug!(
            operation = %name,
            direction = direction.as_str(),
            reply_type = descriptor.reply_type().as_deref().unwrap_or("-"),
            routes = routes.len(),
            "Registering {} operation '{}'",
            direction.as_str(),
            name
        );

        self.by_name.insert(key, self.operations.len());
        self.operations.push(RegisteredOperation {
            descriptor,
            direction,
            direction_source,
            routes,
            handler: Arc::new(TypedHandler::new(handler)),
        });
        Ok(())
    }

    /// Looks up an operation by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredOperation> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.operations[idx])
    }

    /// Resolves an operation by name.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::UnknownOperation` when nothing is registered
    /// under `name`.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredOperation, DispatchError> {
        self.get(name).ok_or_else(|| DispatchError::UnknownOperation {
            name: name.to_string(),
        })
    }

    /// All operations in registration order.
    pub fn operations(&self) -> impl Iterator<Item = &RegisteredOperation> {
        self.operations.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Reply operations reachable with `format`.
    #[must_use]
    pub fn reply_operation_names(&self, format: WireFormat) -> Vec<&str> {
        self.names_for(Direction::Reply, format)
    }

    /// One-way operations reachable with `format`.
    #[must_use]
    pub fn one_way_operation_names(&self, format: WireFormat) -> Vec<&str> {
        self.names_for(Direction::OneWay, format)
    }

    fn names_for(&self, direction: Direction, format: WireFormat) -> Vec<&str> {
        self.operations
            .iter()
            .filter(|op| op.direction == direction)
            .filter(|op| op.restriction().allows_format(format.flag()))
            .map(RegisteredOperation::name)
            .collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("operations", &self.operations)
            .field("strict_verb_inference", &self.strict_verb_inference)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

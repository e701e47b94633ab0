//! Operation descriptors: the registration-time description of a request DTO.
//!
//! A descriptor carries everything the dispatch pipeline needs to know about
//! an operation without runtime type introspection: its name, reply linkage,
//! routes, restriction rule, declared request fields and free-form metadata
//! read by route-inference strategies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::restriction::RestrictionRule;
use crate::route::RouteSpec;
use crate::verb::{classify, Direction};

/// Suffix appended to an operation name to name its inferred reply type.
pub const RESPONSE_SUFFIX: &str = "Response";

/// Declared type of a request field, used to coerce path variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
}

impl FieldKind {
    /// Converts a raw path-variable string into a document value.
    ///
    /// Values that do not parse as the declared kind stay strings, so the
    /// typed deserializer reports the mismatch with the field name.
    #[must_use]
    pub fn coerce(self, raw: &str) -> Value {
        match self {
            Self::String => Value::String(raw.to_string()),
            Self::Integer => raw
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| raw.parse::<u64>().map(Value::from))
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(|| Value::String(raw.to_string()), Value::Number),
            Self::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => Value::String(raw.to_string()),
            },
        }
    }
}

/// One declared request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

/// Where an operation's direction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionSource {
    /// `one_way()` or `returns(..)` on the descriptor.
    Declared,
    /// A listed verb prefix of the operation name.
    Verb(&'static str),
    /// No declaration and no verb match; defaulted to reply.
    Default,
}

/// Registration-time description of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    name: String,
    reply_type: Option<String>,
    declared_direction: Option<Direction>,
    routes: Vec<RouteSpec>,
    restriction: RestrictionRule,
    fields: Vec<FieldDescriptor>,
    metadata: BTreeMap<String, String>,
}

impl OperationDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply_type: None,
            declared_direction: None,
            routes: Vec::new(),
            restriction: RestrictionRule::none(),
            fields: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Declares a reply operation answering with the named response type.
    #[must_use]
    pub fn returns(mut self, reply_type: impl Into<String>) -> Self {
        self.reply_type = Some(reply_type.into());
        self.declared_direction = Some(Direction::Reply);
        self
    }

    /// Declares a one-way operation with no reply type.
    #[must_use]
    pub fn one_way(mut self) -> Self {
        self.reply_type = None;
        self.declared_direction = Some(Direction::OneWay);
        self
    }

    /// Adds a route template. `verbs` of `None` accepts any verb.
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, verbs: Option<&str>) -> Self {
        self.routes.push(RouteSpec::new(path, verbs));
        self
    }

    #[must_use]
    pub fn restrict(mut self, rule: impl Into<RestrictionRule>) -> Self {
        self.restriction = rule.into();
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            kind,
        });
        self
    }

    /// Attaches a custom attribute read by route-inference strategies.
    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    #[must_use]
    pub fn restriction(&self) -> &RestrictionRule {
        &self.restriction
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Case-insensitive metadata lookup.
    #[must_use]
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive field lookup.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Resolved direction together with where it came from.
    #[must_use]
    pub fn direction_with_source(&self) -> (Direction, DirectionSource) {
        if let Some(direction) = self.declared_direction {
            return (direction, DirectionSource::Declared);
        }
        let classification = classify(&self.name);
        let source = classification
            .matched_verb
            .map_or(DirectionSource::Default, DirectionSource::Verb);
        (classification.direction, source)
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction_with_source().0
    }

    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.direction() == Direction::OneWay
    }

    /// The reply type name; inferred as `{Name}Response` for reply operations
    /// that did not declare one. `None` for one-way operations.
    #[must_use]
    pub fn reply_type(&self) -> Option<String> {
        match self.direction() {
            Direction::OneWay => None,
            Direction::Reply => Some(
                self.reply_type
                    .clone()
                    .unwrap_or_else(|| format!("{}{RESPONSE_SUFFIX}", self.name)),
            ),
        }
    }
}

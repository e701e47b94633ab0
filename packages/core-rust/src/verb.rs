//! Operation direction inference from the operation name's leading verb.
//!
//! Read-style verbs (`GetCustomers`, `SearchOrders`) imply a synchronous
//! reply; write-style verbs (`StoreCustomer`, `DeleteOrder`) imply a
//! fire-and-forget one-way call. Names starting with neither default to
//! [`Direction::Reply`].

use serde::{Deserialize, Serialize};

use crate::attributes::EndpointAttributes;

/// Verbs implying a synchronous reply.
pub const REPLY_VERBS: &[&str] = &["get", "search", "find", "list", "query", "fetch", "count"];

/// Verbs implying a one-way call.
pub const ONE_WAY_VERBS: &[&str] = &["store", "add", "assign", "delete", "remove", "notify"];

/// Whether an operation answers synchronously or is fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Reply,
    OneWay,
}

impl Direction {
    /// The endpoint attribute flag describing this direction.
    #[must_use]
    pub const fn flag(self) -> EndpointAttributes {
        match self {
            Self::Reply => EndpointAttributes::SYNC_REPLY,
            Self::OneWay => EndpointAttributes::ASYNC_ONE_WAY,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reply => "Reply",
            Self::OneWay => "OneWay",
        }
    }
}

/// Result of classifying an operation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub direction: Direction,
    /// The verb that matched, or `None` when the default applied.
    pub matched_verb: Option<&'static str>,
}

impl Classification {
    /// True when no listed verb matched and the default was used.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.matched_verb.is_none()
    }
}

/// Classifies an operation name by case-insensitive verb prefix.
///
/// One-way verbs are checked first; none of the listed verbs is a prefix of
/// another across the two lists, so the order only matters for future
/// additions.
#[must_use]
pub fn classify(operation_name: &str) -> Classification {
    if let Some(verb) = match_prefix(operation_name, ONE_WAY_VERBS) {
        return Classification {
            direction: Direction::OneWay,
            matched_verb: Some(verb),
        };
    }
    Classification {
        direction: Direction::Reply,
        matched_verb: match_prefix(operation_name, REPLY_VERBS),
    }
}

/// Shorthand for `classify(name).direction`.
#[must_use]
pub fn classify_direction(operation_name: &str) -> Direction {
    classify(operation_name).direction
}

fn match_prefix(name: &str, verbs: &[&'static str]) -> Option<&'static str> {
    verbs.iter().copied().find(|verb| {
        name.get(..verb.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(verb))
    })
}

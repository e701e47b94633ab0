//! Endpoint attribute flags describing how a request reached the server.
//!
//! A single `EndpointAttributes` value is used in two roles:
//!
//! - **Concrete request**: exactly one direction flag, exactly one format
//!   flag, at most one security flag (see [`EndpointAttributes::is_concrete`]).
//! - **Capability set**: any union of flags, e.g. one AND-group of a
//!   [`RestrictionRule`](crate::restriction::RestrictionRule).

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

/// Set of transport, security, verb, format and direction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAttributes(u32);

impl EndpointAttributes {
    pub const NONE: Self = Self(0);

    // Direction
    pub const ASYNC_ONE_WAY: Self = Self(1 << 0);
    pub const SYNC_REPLY: Self = Self(1 << 1);

    // Security
    pub const SECURE: Self = Self(1 << 2);
    pub const IN_SECURE: Self = Self(1 << 3);

    // Format
    pub const SOAP11: Self = Self(1 << 4);
    pub const SOAP12: Self = Self(1 << 5);
    pub const XML: Self = Self(1 << 6);
    pub const JSON: Self = Self(1 << 7);
    pub const MSG_PACK: Self = Self(1 << 8);

    // Verb
    pub const HTTP_GET: Self = Self(1 << 9);
    pub const HTTP_POST: Self = Self(1 << 10);
    pub const HTTP_PUT: Self = Self(1 << 11);
    pub const HTTP_DELETE: Self = Self(1 << 12);

    // Network
    pub const INTERNAL: Self = Self(1 << 13);
    pub const EXTERNAL: Self = Self(1 << 14);

    // Transport
    pub const MESSAGE_QUEUE: Self = Self(1 << 15);

    pub const ANY_DIRECTION: Self = Self(Self::ASYNC_ONE_WAY.0 | Self::SYNC_REPLY.0);
    pub const ANY_SECURITY: Self = Self(Self::SECURE.0 | Self::IN_SECURE.0);
    pub const ANY_FORMAT: Self = Self(
        Self::SOAP11.0 | Self::SOAP12.0 | Self::XML.0 | Self::JSON.0 | Self::MSG_PACK.0,
    );
    pub const ANY_VERB: Self = Self(
        Self::HTTP_GET.0 | Self::HTTP_POST.0 | Self::HTTP_PUT.0 | Self::HTTP_DELETE.0,
    );
    pub const ANY_NETWORK: Self = Self(Self::INTERNAL.0 | Self::EXTERNAL.0);

    /// Flag names in declaration order, used by `Display` and diagnostics.
    const NAMES: [(Self, &'static str); 16] = [
        (Self::ASYNC_ONE_WAY, "AsyncOneWay"),
        (Self::SYNC_REPLY, "SyncReply"),
        (Self::SECURE, "Secure"),
        (Self::IN_SECURE, "InSecure"),
        (Self::SOAP11, "Soap11"),
        (Self::SOAP12, "Soap12"),
        (Self::XML, "Xml"),
        (Self::JSON, "Json"),
        (Self::MSG_PACK, "MsgPack"),
        (Self::HTTP_GET, "HttpGet"),
        (Self::HTTP_POST, "HttpPost"),
        (Self::HTTP_PUT, "HttpPut"),
        (Self::HTTP_DELETE, "HttpDelete"),
        (Self::INTERNAL, "Internal"),
        (Self::EXTERNAL, "External"),
        (Self::MESSAGE_QUEUE, "MessageQueue"),
    ];

    /// Returns the raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a set from raw bits, discarding bits that name no flag.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::all().0)
    }

    /// Every known flag.
    #[must_use]
    pub const fn all() -> Self {
        Self(
            Self::ANY_DIRECTION.0
                | Self::ANY_SECURITY.0
                | Self::ANY_FORMAT.0
                | Self::ANY_VERB.0
                | Self::ANY_NETWORK.0
                | Self::MESSAGE_QUEUE.0,
        )
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set union.
    #[must_use]
    pub const fn combine(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set difference: flags of `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True when every flag in `required` is present in `self`.
    #[must_use]
    pub const fn has_all(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    /// True when at least one flag in `required` is present in `self`.
    #[must_use]
    pub const fn has_any(self, required: Self) -> bool {
        self.0 & required.0 != 0
    }

    #[must_use]
    pub const fn is_reply(self) -> bool {
        self.has_all(Self::SYNC_REPLY)
    }

    #[must_use]
    pub const fn is_one_way(self) -> bool {
        self.has_all(Self::ASYNC_ONE_WAY)
    }

    #[must_use]
    pub const fn is_secure(self) -> bool {
        self.has_all(Self::SECURE)
    }

    #[must_use]
    pub const fn is_internal(self) -> bool {
        self.has_all(Self::INTERNAL)
    }

    /// Number of flags set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// The single format flag, if exactly one is set.
    #[must_use]
    pub fn format(self) -> Option<Self> {
        self.single_within(Self::ANY_FORMAT)
    }

    /// The single HTTP verb flag, if exactly one is set.
    #[must_use]
    pub fn verb(self) -> Option<Self> {
        self.single_within(Self::ANY_VERB)
    }

    /// Replaces every flag of `group` with `replacement`.
    #[must_use]
    pub const fn with_group(self, group: Self, replacement: Self) -> Self {
        Self((self.0 & !group.0) | (replacement.0 & group.0))
    }

    /// Whether this set describes a fully-resolved request rather than a
    /// capability set.
    #[must_use]
    pub const fn is_concrete(self) -> bool {
        let direction = self.0 & Self::ANY_DIRECTION.0;
        let format = self.0 & Self::ANY_FORMAT.0;
        let security = self.0 & Self::ANY_SECURITY.0;
        direction.count_ones() == 1 && format.count_ones() == 1 && security.count_ones() <= 1
    }

    /// Maps an HTTP method name (case-insensitive) to its verb flag.
    #[must_use]
    pub fn from_http_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Some(Self::HTTP_GET),
            "POST" => Some(Self::HTTP_POST),
            "PUT" | "PATCH" => Some(Self::HTTP_PUT),
            "DELETE" => Some(Self::HTTP_DELETE),
            _ => None,
        }
    }

    /// Iterates over the individual flags in the set.
    pub fn iter(self) -> impl Iterator<Item = Self> {
        Self::NAMES
            .iter()
            .filter(move |(flag, _)| self.has_all(*flag))
            .map(|(flag, _)| *flag)
    }

    fn single_within(self, group: Self) -> Option<Self> {
        let masked = Self(self.0 & group.0);
        (masked.len() == 1).then_some(masked)
    }
}

impl BitOr for EndpointAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.combine(rhs)
    }
}

impl BitOrAssign for EndpointAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.combine(rhs);
    }
}

impl BitAnd for EndpointAttributes {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for EndpointAttributes {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0 & Self::all().0)
    }
}

impl fmt::Display for EndpointAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let mut first = true;
        for (flag, name) in &Self::NAMES {
            if self.has_all(*flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

//! Wire formats and the per-format codec contract.
//!
//! Codecs translate between wire bytes and a format-neutral
//! [`serde_json::Value`] document. Typed request/response DTOs are converted
//! to and from that document by the dispatcher, so a codec never needs to
//! know about concrete operation types.
//!
//! JSON and `MsgPack` codecs ship with the crate. XML and SOAP formats are
//! contract-only: a host registers its own [`Codec`] for them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::EndpointAttributes;

/// Serialization format of a request or response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Json,
    Xml,
    Soap11,
    Soap12,
    MsgPack,
}

impl WireFormat {
    pub const ALL: [Self; 5] = [Self::Json, Self::Xml, Self::Soap11, Self::Soap12, Self::MsgPack];

    /// The endpoint attribute flag for this format.
    #[must_use]
    pub const fn flag(self) -> EndpointAttributes {
        match self {
            Self::Json => EndpointAttributes::JSON,
            Self::Xml => EndpointAttributes::XML,
            Self::Soap11 => EndpointAttributes::SOAP11,
            Self::Soap12 => EndpointAttributes::SOAP12,
            Self::MsgPack => EndpointAttributes::MSG_PACK,
        }
    }

    /// Maps a single format flag back to its `WireFormat`.
    #[must_use]
    pub fn from_flag(flag: EndpointAttributes) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.flag() == flag)
    }

    /// Extracts the format of a concrete request's attributes.
    #[must_use]
    pub fn from_attributes(attrs: EndpointAttributes) -> Option<Self> {
        attrs.format().and_then(Self::from_flag)
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::Soap11 => "text/xml; charset=utf-8",
            Self::Soap12 => "application/soap+xml; charset=utf-8",
            Self::MsgPack => "application/x-msgpack",
        }
    }

    /// Path segment used by predefined endpoints, e.g. `/json/reply/..`.
    #[must_use]
    pub const fn path_name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Soap11 => "soap11",
            Self::Soap12 => "soap12",
            Self::MsgPack => "msgpack",
        }
    }

    /// Parses a predefined-endpoint path segment (case-insensitive).
    #[must_use]
    pub fn from_path_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.path_name().eq_ignore_ascii_case(name))
    }

    /// Format named by a `Content-Type` value. Parameters (`; charset=..`)
    /// are ignored; for a list the first recognised media type wins.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        content_type
            .split(',')
            .find_map(|entry| Self::from_media_type(entry.split(';').next().unwrap_or_default()))
    }

    /// Format for a bare media type such as `application/json`.
    #[must_use]
    pub fn from_media_type(media: &str) -> Option<Self> {
        match media.trim().to_ascii_lowercase().as_str() {
            "application/json" | "text/json" => Some(Self::Json),
            "application/xml" => Some(Self::Xml),
            "text/xml" => Some(Self::Soap11),
            "application/soap+xml" => Some(Self::Soap12),
            "application/x-msgpack" | "application/msgpack" => Some(Self::MsgPack),
            _ => None,
        }
    }
}

/// One entry of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
struct AcceptEntry<'a> {
    media: &'a str,
    quality: f32,
}

/// Parses an `Accept` header into entries ordered by descending `q`,
/// keeping header order among equal weights. Entries with `q=0` or an
/// unparseable weight are dropped.
fn accept_entries(accept: &str) -> Vec<AcceptEntry<'_>> {
    let mut entries: Vec<AcceptEntry<'_>> = accept
        .split(',')
        .filter_map(|raw| {
            let mut parts = raw.split(';');
            let media = parts.next()?.trim();
            if media.is_empty() {
                return None;
            }
            let mut quality = 1.0_f32;
            for param in parts {
                if let Some((key, value)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("q") {
                        quality = value.trim().parse().unwrap_or(0.0);
                    }
                }
            }
            (quality > 0.0).then_some(AcceptEntry { media, quality })
        })
        .collect();
    entries.sort_by(|a, b| b.quality.total_cmp(&a.quality));
    entries
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_name())
    }
}

/// Errors produced by codecs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode {format} body: {reason}")]
    Decode { format: WireFormat, reason: String },
    #[error("failed to encode {format} body: {reason}")]
    Encode { format: WireFormat, reason: String },
    #[error("no codec registered for format {format}")]
    Unsupported { format: WireFormat },
}

/// Serialize/deserialize contract for one wire format.
pub trait Codec: Send + Sync {
    fn format(&self) -> WireFormat;

    /// Decodes a body into a document.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` for malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Encodes a document into wire bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the document cannot be represented.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            format: WireFormat::Json,
            reason: e.to_string(),
        })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            format: WireFormat::Json,
            reason: e.to_string(),
        })
    }
}

/// `MsgPack` codec backed by `rmp-serde`, writing maps with named fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn format(&self) -> WireFormat {
        WireFormat::MsgPack
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
            format: WireFormat::MsgPack,
            reason: e.to_string(),
        })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::Encode {
            format: WireFormat::MsgPack,
            reason: e.to_string(),
        })
    }
}

/// Codecs keyed by wire format.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<WireFormat, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the JSON and `MsgPack` codecs.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(JsonCodec);
        registry.register(MsgPackCodec);
        registry
    }

    /// Registers a codec, replacing any previous codec for the same format.
    pub fn register<C: Codec + 'static>(&mut self, codec: C) {
        self.codecs.insert(codec.format(), Arc::new(codec));
    }

    /// Looks up the codec for a format.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Unsupported` when no codec is registered.
    pub fn get(&self, format: WireFormat) -> Result<&Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(&format)
            .ok_or(CodecError::Unsupported { format })
    }

    #[must_use]
    pub fn supports(&self, format: WireFormat) -> bool {
        self.codecs.contains_key(&format)
    }

    /// Picks the response format for an `Accept` header.
    ///
    /// The highest-weighted media type with a registered codec wins; `*/*`
    /// and `application/*` stand for `fallback`. When nothing acceptable is
    /// supported the result is `fallback`.
    #[must_use]
    pub fn negotiate_accept(&self, accept: &str, fallback: WireFormat) -> WireFormat {
        accept_entries(accept)
            .into_iter()
            .find_map(|entry| {
                let format = match entry.media {
                    "*/*" | "application/*" => Some(fallback),
                    media => WireFormat::from_media_type(media),
                };
                format.filter(|f| self.supports(*f))
            })
            .unwrap_or(fallback)
    }

    /// Registered formats in a stable order.
    #[must_use]
    pub fn formats(&self) -> Vec<WireFormat> {
        WireFormat::ALL
            .into_iter()
            .filter(|f| self.codecs.contains_key(f))
            .collect()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

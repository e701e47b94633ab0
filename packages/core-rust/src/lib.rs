//! opwire core: endpoint attributes, operation direction inference,
//! restriction rules, route templates, wire formats and codecs.

pub mod attributes;
pub mod format;
pub mod operation;
pub mod restriction;
pub mod route;
pub mod verb;

pub use attributes::EndpointAttributes;
pub use format::{Codec, CodecError, CodecRegistry, JsonCodec, MsgPackCodec, WireFormat};
pub use operation::{DirectionSource, FieldDescriptor, FieldKind, OperationDescriptor};
pub use restriction::{RestrictionRule, UnmetGroup};
pub use route::{
    split_path, PathVariables, RouteSpec, RouteTemplate, RouteTemplateError, TemplateMatch,
};
pub use verb::{classify, classify_direction, Classification, Direction};

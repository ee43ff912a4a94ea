//! Kind-dispatched manifest parsing

pub mod parser;
pub mod registry;

pub use parser::{BuildFromParsed, ManifestParser, ObjectKey, ParsedObjects};
pub use registry::{Decoder, KindRegistry};

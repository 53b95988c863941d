//! Inbound protocol handling: line framing and event classification.

pub mod classifier;
pub mod codec;

pub use classifier::Classifier;
pub use codec::{DEFAULT_MAX_LINE_LENGTH, LineCodec};

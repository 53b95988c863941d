//! Foundation layer - the data that flows through the engine.
//!
//! - Classified inbound events ([`Event`], [`EventKind`])
//! - Outbound chat replies and protocol lines ([`OutboundMessage`], [`Outbound`])

pub mod event;
pub mod message;

pub use event::{Event, EventKind, Tags};
pub use message::{MessageKind, Outbound, OutboundMessage};

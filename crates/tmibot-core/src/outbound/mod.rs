//! Outbound path: transport slot, rate-limited sender and cooldowns.

pub mod limiter;
pub mod sender;
pub mod transport;

pub use limiter::CooldownLimiter;
pub use sender::{AllowAll, SendPolicy, Sender, SenderConfig, SenderHandle};
pub use transport::{BoxedWriter, Transport, redact};

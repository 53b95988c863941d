//! tmibot runtime - everything around the core engine.
//!
//! - Layered configuration ([`config`]) and logging setup ([`logging`])
//! - JSON-file persistence for state and roles ([`persistence`])
//! - Connection supervision with backoff and re-join ([`connection`])
//! - The local operator console ([`console`])
//! - [`BotRuntime`], which ties them together
//!
//! ```ignore
//! use tmibot_core::register_admin_commands;
//! use tmibot_runtime::BotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder()
//!         .handlers(register_admin_commands)
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, TmibotConfig};
pub use connection::{Session, SessionEnd, Supervisor, connect_with_retry};
pub use console::{Console, ConsoleExit};
pub use error::{PersistError, RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use persistence::JsonFileBackend;
pub use runtime::{BotRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

//! tmibot - a Twitch chat bot built on an ordered handler pipeline.
//!
//! This crate re-exports the two layers of the bot:
//!
//! - [`core`]: the engine, handler pipeline, state store and rate-limited
//!   sender
//! - [`runtime`]: configuration, logging, persistence, connection
//!   supervision and the operator console
//!
//! ```ignore
//! use tmibot::prelude::*;
//!
//! async fn hello(ctx: Arc<HandlerContext>) -> HandlerResult {
//!     if ctx.text() != "!hello" {
//!         return Ok(Outcome::Continue);
//!     }
//!     ctx.reply(format!("Hello {}!", ctx.user()), MessageKind::Command)?;
//!     Ok(Outcome::Handled)
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder()
//!         .handlers(|registry| {
//!             register_admin_commands(registry);
//!             registry.command("hello", hello);
//!         })
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub use tmibot_core as core;
pub use tmibot_runtime as runtime;

pub use tmibot_core::{
    Engine, HandlerContext, HandlerResult, MessageKind, Outcome, Registry,
    register_admin_commands,
};
pub use tmibot_runtime::{BotRuntime, RuntimeBuilder, RuntimeError, TmibotConfig};

/// Everything a handler module usually needs.
pub mod prelude {
    pub use std::sync::Arc;

    pub use tmibot_core::{
        Engine, Event, HandlerContext, HandlerResult, MessageKind, Outcome, Registry, TaskContext,
        register_admin_commands,
    };
    pub use tmibot_runtime::prelude::*;
    pub use tmibot_runtime::{BotRuntime, RuntimeBuilder};
}

//! Handler trait and the context handlers receive.
//!
//! Any async function (or closure) of the form
//! `Fn(Arc<HandlerContext>) -> impl Future<Output = HandlerResult>` is a
//! [`Handler`]:
//!
//! ```rust,ignore
//! async fn hello(ctx: Arc<HandlerContext>) -> HandlerResult {
//!     if ctx.text() != "!hello" {
//!         return Ok(Outcome::Continue);
//!     }
//!     ctx.reply("hi", MessageKind::Command)?;
//!     Ok(Outcome::Handled)
//! }
//!
//! registry.returns("hello", hello);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::foundation::{Event, MessageKind, OutboundMessage};

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// The handler consumed the event. In the returns stage this stops
    /// every later returns and command handler.
    Handled,
    /// The handler did not act, or acted without claiming the event.
    #[default]
    Continue,
}

impl Outcome {
    /// Whether the event was handled.
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

impl From<bool> for Outcome {
    fn from(handled: bool) -> Self {
        if handled { Self::Handled } else { Self::Continue }
    }
}

/// Result type returned by every handler.
pub type HandlerResult = anyhow::Result<Outcome>;

/// Everything a handler can see for one event.
#[derive(Clone)]
pub struct HandlerContext {
    event: Arc<Event>,
    engine: Engine,
}

impl HandlerContext {
    /// Creates a context for one event.
    pub fn new(event: Arc<Event>, engine: Engine) -> Self {
        Self { event, engine }
    }

    /// The event being dispatched.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The engine, for state, cooldowns, roles and sending.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Channel the event came from.
    pub fn channel(&self) -> &str {
        &self.event.channel
    }

    /// Sending (or targeted) user, empty if none.
    pub fn user(&self) -> &str {
        self.event.user_or_empty()
    }

    /// Payload text.
    pub fn text(&self) -> &str {
        &self.event.payload
    }

    /// Queues a message to the event's channel.
    pub fn reply(&self, content: impl Into<String>, kind: MessageKind) -> EngineResult<()> {
        self.engine
            .send(OutboundMessage::new(content, kind, self.channel()))
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// An event handler.
pub trait Handler: Send + Sync + 'static {
    /// Runs the handler.
    fn call(&self, ctx: Arc<HandlerContext>) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<HandlerContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: Arc<HandlerContext>) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(ctx))
    }
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn Handler>;

/// Boxes a handler.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

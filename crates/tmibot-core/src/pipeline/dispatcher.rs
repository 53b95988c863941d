//! Event dispatcher.
//!
//! Routes each classified [`Event`] through the current [`Registry`]:
//!
//! - **Chat messages**
//!   1. Admin handlers (sender is the administrator), all of them.
//!   2. Role-bound handlers for every role the sender holds in the channel.
//!      A role handler reporting `Handled` is logged as a grant.
//!   3. Returns handlers in order, stopping at the first `Handled`.
//!   4. Command handlers, all of them, unless step 3 stopped.
//! - **User notices** run every notice handler.
//! - **Clear chat** runs every clear-chat handler.
//! - **Keep-alive** queues `PONG :<token>`.
//! - **Join/part acks** update channel confirmation.
//! - **Login errors** never reach a handler; the report is marked fatal.
//! - **Unrecognized** lines are logged at debug level and dropped.
//!
//! A handler that errors or panics is logged with its name; its siblings
//! and later stages still run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use super::handler::{HandlerContext, Outcome};
use super::registry::{NamedHandler, Registry, Stage};
use crate::engine::Engine;
use crate::foundation::{Event, EventKind};

/// What happened while dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Kind of the dispatched event.
    pub kind: EventKind,
    /// Stages that ran, in order.
    pub stages: Vec<Stage>,
    /// Name of the returns handler that claimed the event, if any.
    pub short_circuited_by: Option<String>,
    /// Handlers invoked.
    pub handlers_run: usize,
    /// Handlers that returned an error or panicked.
    pub faults: usize,
    /// The event requires the connection to be torn down.
    pub fatal: bool,
}

impl DispatchReport {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            stages: Vec::new(),
            short_circuited_by: None,
            handlers_run: 0,
            faults: 0,
            fatal: false,
        }
    }

    /// Whether a returns handler stopped the chat pipeline.
    pub fn short_circuited(&self) -> bool {
        self.short_circuited_by.is_some()
    }
}

/// Holds the current registry and runs events through it.
pub struct Dispatcher {
    registry: RwLock<Arc<Registry>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
        }
    }

    /// The current registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read())
    }

    /// Replaces the registry, returning the old one. Events already being
    /// dispatched finish against the registry they started with.
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        std::mem::replace(&mut *self.registry.write(), Arc::new(registry))
    }

    /// Dispatches one event.
    pub async fn dispatch(&self, event: Event, engine: &Engine) -> DispatchReport {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            kind = %event.kind,
            channel = %event.channel
        );
        self.dispatch_inner(event, engine).instrument(span).await
    }

    async fn dispatch_inner(&self, event: Event, engine: &Engine) -> DispatchReport {
        let registry = self.registry();
        let mut report = DispatchReport::new(event.kind);

        match event.kind {
            EventKind::ChatMessage => {
                let ctx = Arc::new(HandlerContext::new(Arc::new(event), engine.clone()));
                dispatch_chat(&registry, &ctx, &mut report).await;
            }
            EventKind::UserNotice => {
                let ctx = Arc::new(HandlerContext::new(Arc::new(event), engine.clone()));
                run_all(Stage::Notice, registry.handlers(Stage::Notice), &ctx, &mut report).await;
            }
            EventKind::ClearChat => {
                let ctx = Arc::new(HandlerContext::new(Arc::new(event), engine.clone()));
                run_all(
                    Stage::ClearChat,
                    registry.handlers(Stage::ClearChat),
                    &ctx,
                    &mut report,
                )
                .await;
            }
            EventKind::KeepAlive => {
                if let Err(e) = engine.send_raw(format!("PONG :{}", event.payload)) {
                    warn!(error = %e, "Failed to queue keep-alive reply");
                }
            }
            EventKind::JoinAck => {
                info!(channel = %event.channel, "Joined channel");
                engine.confirm_join(&event.channel);
            }
            EventKind::PartAck => {
                info!(channel = %event.channel, "Left channel");
                engine.confirm_part(&event.channel);
            }
            EventKind::LoginError => {
                error!(notice = %event.payload, "Server rejected login");
                report.fatal = true;
            }
            EventKind::Unrecognized => {
                debug!(line = %event.payload, "Unrecognized line");
            }
        }

        report
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handler_count", &self.registry.read().handler_count())
            .finish()
    }
}

async fn dispatch_chat(registry: &Registry, ctx: &Arc<HandlerContext>, report: &mut DispatchReport) {
    let engine = ctx.engine();
    let user = ctx.user();
    let channel = ctx.channel();

    if engine.is_admin(user) {
        run_all(Stage::Admin, registry.handlers(Stage::Admin), ctx, report).await;
    }

    let roles = engine.roles();
    if roles.has_role(user, channel) {
        report.stages.push(Stage::Role);
        let held = roles.roles_for(user, channel);
        for binding in registry.role_handlers(&held) {
            if run_one(Stage::Role, &binding.entry, ctx, report).await.is_handled() {
                info!(
                    user = %user,
                    channel = %channel,
                    role = %binding.role,
                    handler = %binding.entry.name,
                    "Role grant used"
                );
            }
        }
    }

    report.stages.push(Stage::Returns);
    for entry in registry.handlers(Stage::Returns) {
        if run_one(Stage::Returns, entry, ctx, report).await.is_handled() {
            debug!(handler = %entry.name, "Event claimed by returns handler");
            report.short_circuited_by = Some(entry.name.clone());
            return;
        }
    }

    run_all(Stage::Command, registry.handlers(Stage::Command), ctx, report).await;
}

async fn run_all(
    stage: Stage,
    entries: &[NamedHandler],
    ctx: &Arc<HandlerContext>,
    report: &mut DispatchReport,
) {
    report.stages.push(stage);
    for entry in entries {
        run_one(stage, entry, ctx, report).await;
    }
}

/// Runs one handler, isolating errors and panics.
async fn run_one(
    stage: Stage,
    entry: &NamedHandler,
    ctx: &Arc<HandlerContext>,
    report: &mut DispatchReport,
) -> Outcome {
    report.handlers_run += 1;
    let call = async { entry.handler.call(Arc::clone(ctx)).await };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            report.faults += 1;
            error!(handler = %entry.name, stage = %stage, error = ?e, "Handler failed");
            Outcome::Continue
        }
        Err(panic) => {
            report.faults += 1;
            error!(
                handler = %entry.name,
                stage = %stage,
                panic = %panic_message(&*panic),
                "Handler panicked"
            );
            Outcome::Continue
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

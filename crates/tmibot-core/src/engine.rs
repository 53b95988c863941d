//! The engine: one cloneable handle over every core component.
//!
//! Handlers, periodic tasks, the console and the connection supervisor all
//! talk to the bot through an [`Engine`].

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::foundation::{Event, MessageKind, OutboundMessage};
use crate::outbound::{CooldownLimiter, SendPolicy, Sender, SenderConfig, SenderHandle, Transport};
use crate::pipeline::dispatcher::panic_message;
use crate::pipeline::{DispatchReport, Dispatcher, HandlerSource, Registry};
use crate::scheduler::{Scheduler, TaskRegistration};
use crate::state::{BotState, NoRoles, RoleAuthority, StateBackend, StateStore, Toggle};

// =============================================================================
// Identity & Policy
// =============================================================================

/// Who the bot is and who administers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Login name, lowercase.
    pub nickname: String,
    /// Administrator's login name, lowercase.
    pub admin: Option<String>,
}

/// Send policy backed by the per-channel toggles in [`BotState`].
#[derive(Debug, Clone)]
pub struct ToggleRules {
    state: StateStore<BotState>,
}

impl ToggleRules {
    pub fn new(state: StateStore<BotState>) -> Self {
        Self { state }
    }
}

impl SendPolicy for ToggleRules {
    fn allows(&self, message: &OutboundMessage) -> bool {
        self.state
            .access(|state| state.allows(&message.channel, message.kind))
    }
}

/// Normalizes a channel name: trims, drops a leading `#`, lowercases.
pub fn normalize_channel(channel: &str) -> EngineResult<String> {
    let name = channel.trim().trim_start_matches('#').to_lowercase();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(EngineError::InvalidChannel(channel.to_string()));
    }
    Ok(name)
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`Engine`].
///
/// ```rust,ignore
/// let engine = Engine::builder("tmibot")
///     .admin("owner")
///     .sender_config(SenderConfig::default())
///     .handlers(|r| {
///         register_admin_commands(r);
///     })
///     .build();
/// ```
pub struct EngineBuilder {
    identity: Identity,
    state: BotState,
    roles: Arc<dyn RoleAuthority>,
    sender_config: SenderConfig,
    policy: Option<Arc<dyn SendPolicy>>,
    backend: Option<Arc<dyn StateBackend>>,
    source: HandlerSource,
    transport: Transport,
    shutdown: CancellationToken,
}

impl EngineBuilder {
    /// Starts a builder for a bot logging in as `nickname`.
    pub fn new(nickname: impl AsRef<str>) -> Self {
        Self {
            identity: Identity {
                nickname: nickname.as_ref().to_lowercase(),
                admin: None,
            },
            state: BotState::default(),
            roles: Arc::new(NoRoles),
            sender_config: SenderConfig::default(),
            policy: None,
            backend: None,
            source: Arc::new(|_: &mut Registry| {}),
            transport: Transport::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the administrator.
    pub fn admin(mut self, admin: impl AsRef<str>) -> Self {
        let admin = admin.as_ref().trim().to_lowercase();
        self.identity.admin = (!admin.is_empty()).then_some(admin);
        self
    }

    /// Sets the initial shared state.
    pub fn state(mut self, state: BotState) -> Self {
        self.state = state;
        self
    }

    /// Sets the role authority.
    pub fn roles(mut self, roles: Arc<dyn RoleAuthority>) -> Self {
        self.roles = roles;
        self
    }

    /// Sets rate-limit and pacing parameters.
    pub fn sender_config(mut self, config: SenderConfig) -> Self {
        self.sender_config = config;
        self
    }

    /// Replaces the default toggle-based send policy.
    pub fn policy(mut self, policy: Arc<dyn SendPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the durable backend used by [`Engine::save`].
    pub fn backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the handler source from a closure.
    pub fn handlers<F>(mut self, source: F) -> Self
    where
        F: Fn(&mut Registry) + Send + Sync + 'static,
    {
        self.source = Arc::new(source);
        self
    }

    /// Sets the handler source.
    pub fn source(mut self, source: HandlerSource) -> Self {
        self.source = source;
        self
    }

    /// Uses an existing transport slot.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Uses an existing shutdown token.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Builds the engine and spawns its sender task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Engine {
        let state = StateStore::new(self.state);
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(ToggleRules::new(state.clone())));
        let (sender, sender_task) = Sender::spawn(
            self.sender_config,
            policy,
            self.transport.clone(),
            self.shutdown.clone(),
        );
        let registry = Registry::build(&self.source);

        Engine {
            inner: Arc::new(EngineInner {
                identity: self.identity,
                state,
                limiter: CooldownLimiter::new(),
                roles: self.roles,
                sender,
                sender_task: Mutex::new(Some(sender_task)),
                transport: self.transport,
                channels: RwLock::new(Vec::new()),
                confirmed: RwLock::new(HashSet::new()),
                dispatcher: Dispatcher::new(registry),
                scheduler: Scheduler::new(),
                source: self.source,
                backend: self.backend,
                reload_lock: tokio::sync::Mutex::new(()),
                shutdown: self.shutdown,
            }),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

struct EngineInner {
    identity: Identity,
    state: StateStore<BotState>,
    limiter: CooldownLimiter,
    roles: Arc<dyn RoleAuthority>,
    sender: SenderHandle,
    sender_task: Mutex<Option<JoinHandle<()>>>,
    transport: Transport,
    /// Joined channels, in join order.
    channels: RwLock<Vec<String>>,
    /// Channels whose join the server acknowledged.
    confirmed: RwLock<HashSet<String>>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    source: HandlerSource,
    backend: Option<Arc<dyn StateBackend>>,
    reload_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Cloneable handle to the running bot.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("identity", &self.inner.identity)
            .field("channels", &*self.inner.channels.read())
            .field("transport", &self.inner.transport)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts building an engine.
    pub fn builder(nickname: impl AsRef<str>) -> EngineBuilder {
        EngineBuilder::new(nickname)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Whether `user` is the configured administrator.
    pub fn is_admin(&self, user: &str) -> bool {
        self.inner
            .identity
            .admin
            .as_deref()
            .is_some_and(|admin| admin.eq_ignore_ascii_case(user))
    }

    /// The shared state store.
    pub fn state(&self) -> &StateStore<BotState> {
        &self.inner.state
    }

    /// The cooldown limiter.
    pub fn limiter(&self) -> &CooldownLimiter {
        &self.inner.limiter
    }

    /// The role authority.
    pub fn roles(&self) -> &dyn RoleAuthority {
        self.inner.roles.as_ref()
    }

    /// The outbound queue.
    pub fn sender(&self) -> &SenderHandle {
        &self.inner.sender
    }

    /// The transport slot.
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// The current handler registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.inner.dispatcher.registry()
    }

    /// Token cancelled when the engine shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    /// Queues a chat message.
    pub fn send(&self, message: OutboundMessage) -> EngineResult<()> {
        self.inner.sender.enqueue(message)
    }

    /// Queues a chat message built from parts.
    pub fn send_to(
        &self,
        channel: &str,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> EngineResult<()> {
        self.send(OutboundMessage::new(content, kind, normalize_channel(channel)?))
    }

    /// Queues a protocol line.
    pub fn send_raw(&self, line: impl Into<String>) -> EngineResult<()> {
        self.inner.sender.enqueue_raw(line)
    }

    /// Queues `text` as a functional message to every joined channel.
    /// Returns how many were queued.
    pub fn farewell(&self, text: &str) -> usize {
        let mut queued = 0;
        for channel in self.channels() {
            match self.send(OutboundMessage::new(text, MessageKind::Functional, channel)) {
                Ok(()) => queued += 1,
                Err(e) => warn!(error = %e, "Failed to queue farewell"),
            }
        }
        queued
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Joins a channel. Returns `false` if already joined.
    ///
    /// A channel without stored settings starts with every toggleable kind
    /// switched off. `JOIN` is only queued while connected; a later
    /// connection re-joins every channel anyway.
    pub fn join_channel(&self, channel: &str) -> EngineResult<bool> {
        let name = normalize_channel(channel)?;
        {
            let mut channels = self.inner.channels.write();
            if channels.contains(&name) {
                return Ok(false);
            }
            channels.push(name.clone());
        }

        if self.inner.state.access(|state| state.ensure_channel(&name)) {
            info!(channel = %name, "New channel, messages switched off");
        }
        if self.inner.transport.is_connected() {
            self.send_raw(format!("JOIN #{name}"))?;
        }
        debug!(channel = %name, "Joining channel");
        Ok(true)
    }

    /// Leaves a channel. Returns `false` if it was not joined.
    pub fn leave_channel(&self, channel: &str) -> EngineResult<bool> {
        let name = normalize_channel(channel)?;
        {
            let mut channels = self.inner.channels.write();
            let Some(pos) = channels.iter().position(|c| *c == name) else {
                return Ok(false);
            };
            channels.remove(pos);
        }
        self.inner.confirmed.write().remove(&name);

        if self.inner.transport.is_connected() {
            self.send_raw(format!("PART #{name}"))?;
        }
        debug!(channel = %name, "Leaving channel");
        Ok(true)
    }

    /// Joined channels, in join order.
    pub fn channels(&self) -> Vec<String> {
        self.inner.channels.read().clone()
    }

    /// Whether `channel` is joined.
    pub fn is_joined(&self, channel: &str) -> bool {
        normalize_channel(channel).is_ok_and(|name| self.inner.channels.read().contains(&name))
    }

    /// Whether the server acknowledged joining `channel`.
    pub fn is_confirmed(&self, channel: &str) -> bool {
        self.inner.confirmed.read().contains(channel)
    }

    /// Queues `JOIN` for every joined channel. Called after each connect.
    pub fn rejoin_all(&self) -> EngineResult<usize> {
        self.inner.confirmed.write().clear();
        let channels = self.channels();
        for channel in &channels {
            self.send_raw(format!("JOIN #{channel}"))?;
        }
        Ok(channels.len())
    }

    pub(crate) fn confirm_join(&self, channel: &str) {
        if self.inner.channels.read().iter().any(|c| c == channel) {
            self.inner.confirmed.write().insert(channel.to_string());
        } else {
            warn!(channel = %channel, "Join acknowledged for a channel not being followed");
        }
    }

    pub(crate) fn confirm_part(&self, channel: &str) {
        self.inner.confirmed.write().remove(channel);
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Applies a toggle to `channel`. For a flip, returns the new state.
    pub fn toggle(&self, channel: &str, toggle: Toggle) -> EngineResult<Option<bool>> {
        let name = normalize_channel(channel)?;
        let result = self
            .inner
            .state
            .access(|state| state.channel_mut(&name).apply(toggle));
        info!(channel = %name, toggle = %toggle, "Channel toggled");
        Ok(result)
    }

    /// Whether messages of `kind` may currently be sent to `channel`.
    pub fn can_send_kind(&self, channel: &str, kind: MessageKind) -> bool {
        self.inner.state.access(|state| state.allows(channel, kind))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Dispatches one event through the current registry.
    pub async fn dispatch(&self, event: Event) -> DispatchReport {
        self.inner.dispatcher.dispatch(event, self).await
    }

    /// Starts the periodic tasks of the current registry.
    pub async fn start_tasks(&self) -> EngineResult<()> {
        let registry = self.registry();
        self.inner.scheduler.start(self, registry.tasks()).await
    }

    /// Stops the periodic tasks, waiting for in-flight bodies.
    pub async fn stop_tasks(&self) -> EngineResult<()> {
        self.inner.scheduler.stop().await
    }

    /// Rebuilds the registry from the handler source and restarts tasks.
    ///
    /// Waits for every in-flight task body before swapping. Concurrent
    /// reloads run one after another.
    pub async fn reload(&self) -> EngineResult<()> {
        let _guard = self.inner.reload_lock.lock().await;
        info!("Reloading handlers");

        if self.inner.scheduler.is_running().await {
            self.inner
                .scheduler
                .reload(self, || self.rebuild_registry())
                .await?;
        } else {
            self.rebuild_registry();
        }

        let registry = self.registry();
        info!(
            handlers = registry.handler_count(),
            tasks = registry.tasks().len(),
            "Handlers reloaded"
        );
        Ok(())
    }

    fn rebuild_registry(&self) -> Vec<TaskRegistration> {
        let registry = Registry::build(&self.inner.source);
        let tasks = registry.tasks().to_vec();
        self.inner.dispatcher.swap(registry);
        tasks
    }

    /// Replaces the shared state with whatever the backend has stored.
    /// Returns `true` if something was loaded.
    pub async fn load_state(&self) -> EngineResult<bool> {
        let Some(backend) = &self.inner.backend else {
            return Ok(false);
        };
        match backend.load().await? {
            Some(state) => {
                info!(channels = state.channels.len(), "State loaded");
                self.inner.state.replace(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies pending buffered writes, persists a snapshot, then runs every
    /// save hook. Hook failures are logged, not returned.
    pub async fn save(&self) -> EngineResult<()> {
        let flushed = self.inner.state.flush_pending();
        let snapshot = self.inner.state.snapshot();

        let persisted = match &self.inner.backend {
            Some(backend) => backend.save(&snapshot).await,
            None => Ok(()),
        };

        let registry = self.registry();
        for entry in registry.save_hooks() {
            let call = async { entry.hook.call(self.clone()).await };
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(hook = %entry.name, error = ?e, "Save hook failed"),
                Err(panic) => error!(
                    hook = %entry.name,
                    panic = %panic_message(&*panic),
                    "Save hook panicked"
                ),
            }
        }

        persisted?;
        info!(flushed, channels = snapshot.channels.len(), "State saved");
        Ok(())
    }

    /// Stops tasks and the sender, then drops the connection.
    pub async fn close(&self) {
        if let Err(e) = self.stop_tasks().await {
            warn!(error = %e, "Periodic tasks did not stop cleanly");
        }
        self.inner.shutdown.cancel();

        let sender_task = self.inner.sender_task.lock().take();
        if let Some(task) = sender_task {
            let _ = task.await;
        }
        self.inner.transport.detach().await;
        debug!("Engine closed");
    }
}

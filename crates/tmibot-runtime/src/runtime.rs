//! The runtime: wires configuration, persistence, the connection supervisor,
//! the periodic saver and the console around one [`Engine`].
//!
//! ```rust,ignore
//! use tmibot_runtime::BotRuntime;
//!
//! let runtime = BotRuntime::builder()
//!     .config_file("tmibot.toml")
//!     .handlers(register_admin_commands)
//!     .build()?;
//! runtime.run().await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tmibot_core::{Engine, HandlerSource, Registry, RoleTable, TransportError};

use crate::config::{ConfigLoader, TmibotConfig, validate_config};
use crate::connection::{SessionEnd, Supervisor};
use crate::console::{Console, ConsoleExit};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::persistence::{JsonFileBackend, load_roles, save_roles};

/// Save hook name under which the role table is written.
pub const ROLES_SAVE_HOOK: &str = "roles";

/// A configured bot, ready to [`run`](Self::run).
pub struct BotRuntime {
    config: TmibotConfig,
    engine: Engine,
    roles: Arc<RoleTable>,
    stop: CancellationToken,
}

impl BotRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already-loaded configuration.
    ///
    /// Validates `config` and spawns the engine's sender, so it must be
    /// called from within a tokio runtime. Logging is left untouched.
    pub fn from_config(config: TmibotConfig, source: HandlerSource) -> RuntimeResult<Self> {
        validate_config(&config)?;

        let roles = Arc::new(RoleTable::new());
        let source = with_roles_hook(source, Arc::clone(&roles), config.state.roles_path.clone());

        let mut builder = Engine::builder(&config.connection.nickname)
            .roles(roles.clone())
            .sender_config(config.sender.to_sender_config())
            .backend(Arc::new(JsonFileBackend::new(&config.state.path)))
            .source(source);
        if let Some(admin) = &config.connection.admin {
            builder = builder.admin(admin);
        }

        info!(
            nickname = %config.connection.nickname,
            addr = %config.connection.address(),
            channels = config.connection.channels.len(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            engine: builder.build(),
            config,
            roles,
            stop: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &TmibotConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Asks a running [`run`](Self::run) to shut down gracefully.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Runs until stopped, a shutdown signal, a login failure, or the
    /// connection is given up.
    ///
    /// On the way out: farewell (if configured), drain the sender, save,
    /// close the engine. A clean stop returns `Ok(())`.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.restore().await?;

        for channel in &self.config.connection.channels {
            self.engine.join_channel(channel)?;
        }
        self.engine.start_tasks().await?;

        let saver = tokio::spawn(save_periodically(
            self.engine.clone(),
            self.config.state.save_interval(),
        ));
        let console = self.config.console.then(|| self.spawn_console());

        info!("tmibot is now running. Press Ctrl+C to stop.");
        let supervisor = Supervisor::new(self.engine.clone(), self.config.connection.clone());
        let outcome = tokio::select! {
            end = supervisor.run() => end.and_then(session_outcome),
            _ = self.stop.cancelled() => {
                info!("Stop requested");
                Ok(())
            }
            _ = wait_for_signal() => Ok(()),
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Shutting down after failure");
        }
        self.shutdown().await;

        if let Some(console) = console {
            console.abort();
        }
        let _ = saver.await;
        outcome
    }

    async fn restore(&self) -> RuntimeResult<()> {
        self.engine.load_state().await?;
        if let Some(map) = load_roles(&self.config.state.roles_path).await? {
            self.roles.load(map);
        }
        Ok(())
    }

    fn spawn_console(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            match Console::stdio(engine).run().await {
                Ok(ConsoleExit::Stop) => stop.cancel(),
                Ok(ConsoleExit::Closed) => debug!("Console input closed"),
                Err(e) => warn!(error = %e, "Console failed"),
            }
        })
    }

    async fn shutdown(&self) {
        if let Some(text) = &self.config.shutdown.farewell {
            let queued = self.engine.farewell(text);
            debug!(channels = queued, "Farewell queued");
        }

        let drain = self.config.shutdown.drain_timeout();
        if !self.engine.sender().wait_idle(drain).await {
            warn!(
                unsent = self.engine.sender().pending(),
                timeout = ?drain,
                "Outbound queue not drained before disconnect"
            );
        }

        if let Err(e) = self.engine.save().await {
            error!(error = %e, "Final save failed");
        }
        self.engine.close().await;
        info!("tmibot stopped");
    }
}

fn session_outcome(end: SessionEnd) -> RuntimeResult<()> {
    match end {
        SessionEnd::Shutdown => Ok(()),
        SessionEnd::LoginFailed { reason } => Err(RuntimeError::LoginFailed { reason }),
        SessionEnd::Closed { reason } => Err(TransportError::closed(reason).into()),
    }
}

/// Wraps `source` so every registry also saves the role table.
fn with_roles_hook(source: HandlerSource, roles: Arc<RoleTable>, path: PathBuf) -> HandlerSource {
    Arc::new(move |registry: &mut Registry| {
        source(registry);
        let roles = Arc::clone(&roles);
        let path = path.clone();
        registry.save_hook(ROLES_SAVE_HOOK, move |_engine: Engine| {
            let snapshot = roles.snapshot();
            let path = path.clone();
            async move { save_roles(&path, &snapshot).await.map_err(anyhow::Error::from) }
        });
    })
}

async fn save_periodically(engine: Engine, every: Duration) {
    let shutdown = engine.shutdown_token();
    let mut ticks = interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                info!("Periodic save");
                if let Err(e) = engine.save().await {
                    error!(error = %e, "Periodic save failed");
                }
            }
        }
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder loading configuration and logging before creating a [`BotRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    source: HandlerSource,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir().with_user_config_dir(),
            source: Arc::new(|_: &mut Registry| {}),
            init_logging: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Replaces the configured channel list.
    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.config_loader = self.config_loader.set("connection.channels", channels);
        self
    }

    /// Overrides whether the stdin console runs.
    pub fn console(mut self, enabled: bool) -> Self {
        self.config_loader = self.config_loader.set("console", enabled);
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

    /// Skips installing the global tracing subscriber.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Loads configuration, installs logging and builds the runtime.
    pub fn build(self) -> RuntimeResult<BotRuntime> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }
        BotRuntime::from_config(config, self.source)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Periodic task scheduler.
//!
//! Each registered task runs in its own tokio task: sleep for the interval,
//! run the body, repeat. Stopping is cooperative. A body that has started
//! always finishes, and [`Scheduler::stop`] waits for it.
//!
//! Every task owns a [`TaskState`] created (and passed through the optional
//! setup step) the first time the task is started. States survive
//! [`Scheduler::reload`] for tasks that are still registered afterwards.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::BoxFuture;
use crate::pipeline::dispatcher::panic_message;

// =============================================================================
// Task State
// =============================================================================

/// Private, persistent state of one periodic task.
#[derive(Clone, Default)]
pub struct TaskState {
    inner: Arc<parking_lot::Mutex<Map<String, Value>>>,
}

impl TaskState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    /// Stores a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.lock().insert(key.into(), value.into())
    }

    /// Runs `f` against the whole map.
    pub fn with<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskState").field(&*self.inner.lock()).finish()
    }
}

/// Passed to task bodies and setup steps.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Registered task name.
    pub name: String,
    /// The task's private state.
    pub state: TaskState,
    /// The engine, exactly as handlers see it.
    pub engine: Engine,
}

/// A periodic task body or setup step.
pub trait TaskBody: Send + Sync + 'static {
    fn call(&self, ctx: TaskContext) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> TaskBody for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, ctx: TaskContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin((self)(ctx))
    }
}

/// A registered periodic task.
#[derive(Clone)]
pub struct TaskRegistration {
    pub name: String,
    pub interval: Duration,
    pub setup: Option<Arc<dyn TaskBody>>,
    pub run: Arc<dyn TaskBody>,
}

impl TaskRegistration {
    /// Creates a task without a setup step.
    pub fn new(name: impl Into<String>, interval: Duration, run: impl TaskBody) -> Self {
        Self {
            name: name.into(),
            interval,
            setup: None,
            run: Arc::new(run),
        }
    }

    /// Adds a setup step (builder pattern).
    pub fn with_setup(mut self, setup: impl TaskBody) -> Self {
        self.setup = Some(Arc::new(setup));
        self
    }
}

impl fmt::Debug for TaskRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistration")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("has_setup", &self.setup.is_some())
            .finish()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Default)]
struct Running {
    token: Option<CancellationToken>,
    handles: Vec<(String, JoinHandle<()>)>,
    states: HashMap<String, TaskState>,
}

/// Starts, stops and reloads periodic tasks.
#[derive(Default)]
pub struct Scheduler {
    running: Mutex<Running>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts every task. New tasks get a fresh state and run their setup
    /// step first; tasks seen before keep their state.
    pub async fn start(&self, engine: &Engine, tasks: &[TaskRegistration]) -> EngineResult<()> {
        let mut running = self.running.lock().await;
        if running.token.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let token = engine.shutdown_token().child_token();
        running
            .states
            .retain(|name, _| tasks.iter().any(|t| &t.name == name));

        for task in tasks {
            let existing = running.states.get(&task.name).cloned();
            let state = match existing {
                Some(state) => state,
                None => {
                    let state = TaskState::new();
                    if let Some(setup) = &task.setup {
                        let ctx = TaskContext {
                            name: task.name.clone(),
                            state: state.clone(),
                            engine: engine.clone(),
                        };
                        guarded(&task.name, "setup", setup, ctx).await;
                    }
                    running.states.insert(task.name.clone(), state.clone());
                    state
                }
            };

            let span = span!(Level::DEBUG, "task", name = %task.name);
            let handle = tokio::spawn(
                run_task(task.clone(), state, engine.clone(), token.clone()).instrument(span),
            );
            running.handles.push((task.name.clone(), handle));
        }

        info!(count = tasks.len(), "Periodic tasks started");
        running.token = Some(token);
        Ok(())
    }

    /// Stops every task and waits for in-flight bodies to finish.
    pub async fn stop(&self) -> EngineResult<()> {
        let mut running = self.running.lock().await;
        let Some(token) = running.token.take() else {
            return Ok(());
        };
        token.cancel();

        let mut first_failure = None;
        for (name, handle) in running.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Periodic task did not stop cleanly");
                first_failure.get_or_insert(EngineError::TaskJoin {
                    name,
                    reason: e.to_string(),
                });
            }
        }
        debug!("Periodic tasks stopped");

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops every task and waits for in-flight bodies, then calls
    /// `rebuild` for the new task list and starts it.
    ///
    /// Must not be called from inside a task body: stopping waits for that
    /// very body.
    pub async fn reload(
        &self,
        engine: &Engine,
        rebuild: impl FnOnce() -> Vec<TaskRegistration>,
    ) -> EngineResult<()> {
        if let Err(e) = self.stop().await {
            warn!(error = %e, "Continuing reload after task failure");
        }
        let tasks = rebuild();
        self.start(engine, &tasks).await
    }

    /// Names of the running tasks.
    pub async fn task_names(&self) -> Vec<String> {
        self.running
            .lock()
            .await
            .handles
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether tasks are running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.token.is_some()
    }

    /// State of a task, if it has ever been started.
    pub async fn state_of(&self, name: &str) -> Option<TaskState> {
        self.running.lock().await.states.get(name).cloned()
    }
}

async fn run_task(
    task: TaskRegistration,
    state: TaskState,
    engine: Engine,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(task.interval) => {}
        }

        let ctx = TaskContext {
            name: task.name.clone(),
            state: state.clone(),
            engine: engine.clone(),
        };
        guarded(&task.name, "run", &task.run, ctx).await;
    }
}

/// Runs a task future, logging errors and panics instead of propagating.
async fn guarded(name: &str, phase: &str, body: &Arc<dyn TaskBody>, ctx: TaskContext) {
    match AssertUnwindSafe(async { body.call(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = %name, phase, error = ?e, "Periodic task failed"),
        Err(panic) => error!(
            task = %name,
            phase,
            panic = %panic_message(&*panic),
            "Periodic task panicked"
        ),
    }
}

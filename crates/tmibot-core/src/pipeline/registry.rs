//! Handler registry.
//!
//! A [`Registry`] is an ordinary value built once from a [`HandlerSource`]
//! and handed to the dispatcher. Reloading builds a fresh one from the same
//! source and swaps it in whole.
//!
//! Every category keeps insertion order. Registering a name that already
//! exists in a category replaces the earlier entry in place, so running a
//! source twice yields the same table.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::handler::{BoxFuture, BoxedHandler, Handler, into_handler};
use crate::engine::Engine;
use crate::scheduler::{TaskBody, TaskRegistration};

/// Pipeline stage a handler is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Run for every chat message from the administrator.
    Admin,
    /// Run for chat messages from users holding the bound role.
    Role,
    /// Short-circuiting; the first `Handled` stops the chat pipeline.
    Returns,
    /// General commands, run unless a returns handler claimed the event.
    Command,
    /// Run for every user notice.
    Notice,
    /// Run for every clear-chat event.
    ClearChat,
}

impl Stage {
    /// Returns the stage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Role => "role",
            Self::Returns => "returns",
            Self::Command => "command",
            Self::Notice => "notice",
            Self::ClearChat => "clear_chat",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler together with its registered name.
#[derive(Clone)]
pub struct NamedHandler {
    pub name: String,
    pub handler: BoxedHandler,
}

impl fmt::Debug for NamedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamedHandler").field(&self.name).finish()
    }
}

/// A handler bound to a role.
#[derive(Debug, Clone)]
pub struct RoleBinding {
    pub role: String,
    pub entry: NamedHandler,
}

/// Hook run after the shared state is persisted.
pub trait SaveHook: Send + Sync + 'static {
    fn call(&self, engine: Engine) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> SaveHook for F
where
    F: Fn(Engine) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, engine: Engine) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin((self)(engine))
    }
}

/// A named save hook.
#[derive(Clone)]
pub struct NamedSaveHook {
    pub name: String,
    pub hook: Arc<dyn SaveHook>,
}

/// The code that fills a registry. Called once at startup and again on
/// every reload.
pub type HandlerSource = Arc<dyn Fn(&mut Registry) + Send + Sync>;

fn upsert<T>(entries: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match entries.iter_mut().find(|e| same(e)) {
        Some(existing) => *existing = item,
        None => entries.push(item),
    }
}

/// Ordered handler, task and save-hook registrations.
#[derive(Clone, Default)]
pub struct Registry {
    admin: Vec<NamedHandler>,
    roles: Vec<RoleBinding>,
    returns: Vec<NamedHandler>,
    command: Vec<NamedHandler>,
    notice: Vec<NamedHandler>,
    clear_chat: Vec<NamedHandler>,
    tasks: Vec<TaskRegistration>,
    save_hooks: Vec<NamedSaveHook>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry by running `source` against an empty one.
    pub fn build(source: &HandlerSource) -> Self {
        let mut registry = Self::new();
        source(&mut registry);
        registry
    }

    fn push(entries: &mut Vec<NamedHandler>, name: &str, handler: BoxedHandler) {
        let entry = NamedHandler {
            name: name.to_string(),
            handler,
        };
        upsert(entries, entry, |e| e.name == name);
    }

    /// Registers an admin-only handler.
    pub fn admin(&mut self, name: &str, handler: impl Handler) -> &mut Self {
        Self::push(&mut self.admin, name, into_handler(handler));
        self
    }

    /// Binds a handler to a role.
    pub fn role(&mut self, role: &str, name: &str, handler: impl Handler) -> &mut Self {
        let binding = RoleBinding {
            role: role.to_string(),
            entry: NamedHandler {
                name: name.to_string(),
                handler: into_handler(handler),
            },
        };
        upsert(&mut self.roles, binding, |b| b.role == role && b.entry.name == name);
        self
    }

    /// Registers a short-circuiting handler.
    pub fn returns(&mut self, name: &str, handler: impl Handler) -> &mut Self {
        Self::push(&mut self.returns, name, into_handler(handler));
        self
    }

    /// Registers a general command handler.
    pub fn command(&mut self, name: &str, handler: impl Handler) -> &mut Self {
        Self::push(&mut self.command, name, into_handler(handler));
        self
    }

    /// Registers a user-notice handler.
    pub fn notice(&mut self, name: &str, handler: impl Handler) -> &mut Self {
        Self::push(&mut self.notice, name, into_handler(handler));
        self
    }

    /// Registers a clear-chat handler.
    pub fn clear_chat(&mut self, name: &str, handler: impl Handler) -> &mut Self {
        Self::push(&mut self.clear_chat, name, into_handler(handler));
        self
    }

    /// Registers a periodic task.
    pub fn task(&mut self, name: &str, interval: Duration, run: impl TaskBody) -> &mut Self {
        let task = TaskRegistration::new(name, interval, run);
        upsert(&mut self.tasks, task, |t| t.name == name);
        self
    }

    /// Registers a periodic task with a one-time setup step.
    pub fn task_with_setup(
        &mut self,
        name: &str,
        interval: Duration,
        setup: impl TaskBody,
        run: impl TaskBody,
    ) -> &mut Self {
        let task = TaskRegistration::new(name, interval, run).with_setup(setup);
        upsert(&mut self.tasks, task, |t| t.name == name);
        self
    }

    /// Registers a save hook.
    pub fn save_hook(&mut self, name: &str, hook: impl SaveHook) -> &mut Self {
        let entry = NamedSaveHook {
            name: name.to_string(),
            hook: Arc::new(hook),
        };
        upsert(&mut self.save_hooks, entry, |h| h.name == name);
        self
    }

    /// Handlers of a non-role stage, in registration order.
    pub fn handlers(&self, stage: Stage) -> &[NamedHandler] {
        match stage {
            Stage::Admin => &self.admin,
            Stage::Returns => &self.returns,
            Stage::Command => &self.command,
            Stage::Notice => &self.notice,
            Stage::ClearChat => &self.clear_chat,
            Stage::Role => &[],
        }
    }

    /// Handlers bound to any of `roles`, grouped by role. A handler bound to
    /// several of the roles appears once.
    pub fn role_handlers(&self, roles: &BTreeSet<String>) -> Vec<&RoleBinding> {
        let mut seen = BTreeSet::new();
        roles
            .iter()
            .flat_map(|role| self.roles.iter().filter(move |b| &b.role == role))
            .filter(|b| seen.insert(b.entry.name.as_str()))
            .collect()
    }

    /// Every role binding.
    pub fn role_bindings(&self) -> &[RoleBinding] {
        &self.roles
    }

    /// Periodic tasks, in registration order.
    pub fn tasks(&self) -> &[TaskRegistration] {
        &self.tasks
    }

    /// Save hooks, in registration order.
    pub fn save_hooks(&self) -> &[NamedSaveHook] {
        &self.save_hooks
    }

    /// Total number of handler registrations across all stages.
    pub fn handler_count(&self) -> usize {
        self.admin.len()
            + self.roles.len()
            + self.returns.len()
            + self.command.len()
            + self.notice.len()
            + self.clear_chat.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |v: &[NamedHandler]| v.iter().map(|e| e.name.clone()).collect::<Vec<_>>();
        f.debug_struct("Registry")
            .field("admin", &names(&self.admin))
            .field("roles", &self.roles.len())
            .field("returns", &names(&self.returns))
            .field("command", &names(&self.command))
            .field("notice", &names(&self.notice))
            .field("clear_chat", &names(&self.clear_chat))
            .field("tasks", &self.tasks.len())
            .field("save_hooks", &self.save_hooks.len())
            .finish()
    }
}

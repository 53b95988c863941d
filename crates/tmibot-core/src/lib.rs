//! Core engine for the tmibot chat client.
//!
//! # Modules
//!
//! - [`protocol`] - line framing ([`LineCodec`]) and event classification
//!   ([`Classifier`])
//! - [`pipeline`] - handler registry and the ordered, short-circuiting
//!   [`Dispatcher`]
//! - [`state`] - the concurrent [`StateStore`] with its non-blocking
//!   buffered writes, bot settings and roles
//! - [`outbound`] - the rate-limited [`Sender`] and per-command cooldowns
//! - [`scheduler`] - periodic background tasks
//! - [`engine`] - the [`Engine`] handle tying it all together
//!
//! # Flow
//!
//! ```text
//! bytes → LineCodec → Classifier → Dispatcher → handlers
//!                                                 │  ├─→ StateStore
//!                                                 │  └─→ SenderHandle → Sender → Transport
//!                                   Scheduler ────┘
//! ```

pub mod builtin;
pub mod engine;
pub mod error;
pub mod foundation;
pub mod outbound;
pub mod pipeline;
pub mod protocol;
pub mod scheduler;
pub mod state;

pub use builtin::register_admin_commands;
pub use engine::{Engine, EngineBuilder, Identity, ToggleRules, normalize_channel};
pub use error::{
    CodecError, EngineError, EngineResult, PersistError, TransportError, TransportResult,
};
pub use foundation::{Event, EventKind, MessageKind, Outbound, OutboundMessage, Tags};
pub use outbound::{
    AllowAll, CooldownLimiter, SendPolicy, Sender, SenderConfig, SenderHandle, Transport,
};
pub use pipeline::{
    DispatchReport, Dispatcher, Handler, HandlerContext, HandlerResult, HandlerSource, Outcome,
    Registry, Stage,
};
pub use protocol::{Classifier, LineCodec};
pub use scheduler::{Scheduler, TaskContext, TaskRegistration, TaskState};
pub use state::{
    BotState, ChannelSettings, MemoryBackend, NoRoles, Operation, RoleAuthority, RoleTable,
    StateBackend, StateStore, Toggle, WriteOutcome,
};

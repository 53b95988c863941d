//! Shared state: the concurrent store, the persisted bot state, its durable
//! backend and roles.

pub mod backend;
pub mod roles;
pub mod settings;
pub mod store;

pub use backend::{MemoryBackend, StateBackend};
pub use roles::{NoRoles, RoleAuthority, RoleMap, RoleTable};
pub use settings::{ADD_TO_COUNTER, BotState, ChannelSettings, CounterDelta, SET_DATA, Toggle};
pub use store::{Operation, StateStore, WriteOutcome};

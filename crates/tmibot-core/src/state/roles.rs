//! Role authorization.
//!
//! The dispatcher asks a [`RoleAuthority`] whether a chat sender holds any
//! role in the channel, and which ones, to decide which role-bound handlers
//! to run.

use std::collections::{BTreeMap, BTreeSet};

use super::store::StateStore;

/// `user → channel → roles`.
pub type RoleMap = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Lookup (and optionally mutation) of per-channel user roles.
pub trait RoleAuthority: Send + Sync {
    /// Whether `user` holds at least one role in `channel`.
    fn has_role(&self, user: &str, channel: &str) -> bool;

    /// Every role `user` holds in `channel`.
    fn roles_for(&self, user: &str, channel: &str) -> BTreeSet<String>;

    /// Grants a role. Returns `false` if it was already held or the
    /// authority is read-only.
    fn grant(&self, _user: &str, _channel: &str, _role: &str) -> bool {
        false
    }

    /// Revokes a role. Returns `false` if it was not held or the authority
    /// is read-only.
    fn revoke(&self, _user: &str, _channel: &str, _role: &str) -> bool {
        false
    }
}

/// An authority under which nobody holds any role.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoles;

impl RoleAuthority for NoRoles {
    fn has_role(&self, _user: &str, _channel: &str) -> bool {
        false
    }

    fn roles_for(&self, _user: &str, _channel: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// In-memory role table guarded by its own [`StateStore`].
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    store: StateStore<RoleMap>,
}

impl RoleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from a loaded map.
    pub fn from_map(map: RoleMap) -> Self {
        Self {
            store: StateStore::new(map),
        }
    }

    /// Replaces the whole table.
    pub fn load(&self, map: RoleMap) {
        self.store.replace(map);
    }

    /// Copies the current table.
    pub fn snapshot(&self) -> RoleMap {
        self.store.snapshot()
    }
}

impl RoleAuthority for RoleTable {
    fn has_role(&self, user: &str, channel: &str) -> bool {
        self.store.access(|map| {
            map.get(user)
                .and_then(|channels| channels.get(channel))
                .is_some_and(|roles| !roles.is_empty())
        })
    }

    fn roles_for(&self, user: &str, channel: &str) -> BTreeSet<String> {
        self.store.access(|map| {
            map.get(user)
                .and_then(|channels| channels.get(channel))
                .cloned()
                .unwrap_or_default()
        })
    }

    fn grant(&self, user: &str, channel: &str, role: &str) -> bool {
        self.store.access(|map| {
            map.entry(user.to_lowercase())
                .or_default()
                .entry(channel.to_lowercase())
                .or_default()
                .insert(role.to_string())
        })
    }

    fn revoke(&self, user: &str, channel: &str, role: &str) -> bool {
        self.store.access(|map| {
            let user = user.to_lowercase();
            let channel = channel.to_lowercase();
            let Some(channels) = map.get_mut(&user) else {
                return false;
            };
            let removed = channels
                .get_mut(&channel)
                .is_some_and(|roles| roles.remove(role));
            if channels.get(&channel).is_some_and(BTreeSet::is_empty) {
                channels.remove(&channel);
            }
            if channels.is_empty() {
                map.remove(&user);
            }
            removed
        })
    }
}

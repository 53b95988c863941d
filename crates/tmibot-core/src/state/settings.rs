//! Shared bot state: per-channel settings, per-user counters and free-form
//! data owned by external handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::store::Operation;
use crate::foundation::MessageKind;

/// A change to a channel's message-kind toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// Enable every toggleable kind.
    On,
    /// Disable every toggleable kind.
    Off,
    /// Invert one kind.
    Flip(MessageKind),
}

impl FromStr for Toggle {
    type Err = String;

    /// Parses the argument of the `!toggle` admin command.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "on" => Self::On,
            "off" => Self::Off,
            "spam" => Self::Flip(MessageKind::Spam),
            "command" => Self::Flip(MessageKind::Command),
            "bld" => Self::Flip(MessageKind::Blacklisted),
            "helpful" => Self::Flip(MessageKind::Helpful),
            "special" => Self::Flip(MessageKind::Special),
            "sub" => Self::Flip(MessageKind::Subscriber),
            other => return Err(format!("unknown toggle '{other}'")),
        })
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
            Self::Flip(kind) => write!(f, "flip {kind}"),
        }
    }
}

/// Settings stored for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Per-kind switches. A missing kind is enabled.
    #[serde(default)]
    pub toggles: BTreeMap<MessageKind, bool>,
    /// Named counters, keyed by counter name then user.
    #[serde(default)]
    pub counters: BTreeMap<String, BTreeMap<String, i64>>,
}

impl ChannelSettings {
    /// Settings with every toggleable kind disabled.
    pub fn all_off() -> Self {
        let mut settings = Self::default();
        settings.apply(Toggle::Off);
        settings
    }

    /// Whether messages of `kind` may be sent.
    pub fn is_enabled(&self, kind: MessageKind) -> bool {
        !kind.is_toggleable() || self.toggles.get(&kind).copied().unwrap_or(true)
    }

    /// Applies a toggle. For [`Toggle::Flip`] returns the kind's new state.
    pub fn apply(&mut self, toggle: Toggle) -> Option<bool> {
        match toggle {
            Toggle::On | Toggle::Off => {
                let enabled = toggle == Toggle::On;
                for kind in MessageKind::ALL.into_iter().filter(MessageKind::is_toggleable) {
                    self.toggles.insert(kind, enabled);
                }
                None
            }
            Toggle::Flip(kind) if kind.is_toggleable() => {
                let enabled = !self.is_enabled(kind);
                self.toggles.insert(kind, enabled);
                Some(enabled)
            }
            Toggle::Flip(_) => Some(true),
        }
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str, user: &str) -> i64 {
        self.counters
            .get(name)
            .and_then(|users| users.get(user))
            .copied()
            .unwrap_or(0)
    }
}

/// Everything the bot persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    /// Settings per channel name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSettings>,
    /// Free-form data owned by external handlers.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl BotState {
    /// Returns a channel's settings, if any are stored.
    pub fn channel(&self, name: &str) -> Option<&ChannelSettings> {
        self.channels.get(name)
    }

    /// Returns a channel's settings, creating defaults when missing.
    pub fn channel_mut(&mut self, name: &str) -> &mut ChannelSettings {
        self.channels.entry(name.to_string()).or_default()
    }

    /// Whether `kind` may be sent to `channel`. Unknown channels allow
    /// everything.
    pub fn allows(&self, channel: &str, kind: MessageKind) -> bool {
        self.channel(channel).is_none_or(|c| c.is_enabled(kind))
    }

    /// Ensures a freshly joined channel has settings, switching it off when
    /// nothing was stored yet. Returns `true` if settings were created.
    pub fn ensure_channel(&mut self, name: &str) -> bool {
        if self.channels.contains_key(name) {
            return false;
        }
        self.channels.insert(name.to_string(), ChannelSettings::all_off());
        true
    }
}

/// Argument for [`ADD_TO_COUNTER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    pub channel: String,
    pub counter: String,
    pub user: String,
    pub delta: i64,
}

impl CounterDelta {
    /// Adds one to `counter` for `user` in `channel`.
    pub fn increment(
        channel: impl Into<String>,
        counter: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            counter: counter.into(),
            user: user.into(),
            delta: 1,
        }
    }
}

/// Adds a delta to a per-user counter. Safe to use from the dispatch path
/// via [`StateStore::buffered_write`](super::StateStore::buffered_write).
pub static ADD_TO_COUNTER: Operation<BotState, CounterDelta> =
    Operation::new("add_to_counter", |state, d| {
        *state
            .channel_mut(&d.channel)
            .counters
            .entry(d.counter)
            .or_default()
            .entry(d.user)
            .or_insert(0) += d.delta;
    });

/// Stores a JSON value under a top-level key of [`BotState::data`].
pub static SET_DATA: Operation<BotState, (String, serde_json::Value)> =
    Operation::new("set_data", |state, (key, value)| {
        state.data.insert(key, value);
    });

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;

    #[test]
    fn unknown_channel_allows_everything() {
        let state = BotState::default();
        assert!(MessageKind::ALL.iter().all(|k| state.allows("nowhere", *k)));
    }

    #[test]
    fn new_channel_starts_off() {
        let mut state = BotState::default();
        assert!(state.ensure_channel("lobby"));
        assert!(!state.ensure_channel("lobby"));

        assert!(!state.allows("lobby", MessageKind::Command));
        assert!(!state.allows("lobby", MessageKind::Spam));
        assert!(state.allows("lobby", MessageKind::Functional));
        assert!(state.allows("lobby", MessageKind::Chat));
    }

    #[test]
    fn flip_inverts_one_kind() {
        let mut settings = ChannelSettings::default();
        assert_eq!(settings.apply(Toggle::Flip(MessageKind::Spam)), Some(false));
        assert!(!settings.is_enabled(MessageKind::Spam));
        assert!(settings.is_enabled(MessageKind::Helpful));
        assert_eq!(settings.apply(Toggle::Flip(MessageKind::Spam)), Some(true));
    }

    #[test]
    fn functional_cannot_be_disabled() {
        let mut settings = ChannelSettings::all_off();
        settings.apply(Toggle::Flip(MessageKind::Functional));
        assert!(settings.is_enabled(MessageKind::Functional));
    }

    #[test]
    fn toggle_arguments_parse() {
        assert_eq!("on".parse::<Toggle>(), Ok(Toggle::On));
        assert_eq!("OFF".parse::<Toggle>(), Ok(Toggle::Off));
        assert_eq!(
            "bld".parse::<Toggle>(),
            Ok(Toggle::Flip(MessageKind::Blacklisted))
        );
        assert_eq!(
            "sub".parse::<Toggle>(),
            Ok(Toggle::Flip(MessageKind::Subscriber))
        );
        assert!("chat".parse::<Toggle>().is_err());
    }

    #[test]
    fn counters_accumulate_through_store() {
        let store = StateStore::new(BotState::default());
        for _ in 0..3 {
            store.buffered_write(&ADD_TO_COUNTER, CounterDelta::increment("lobby", "msgs", "alice"));
        }
        let count = store.access(|s| s.channel("lobby").map(|c| c.counter("msgs", "alice")));
        assert_eq!(count, Some(3));
    }

    #[test]
    fn state_json_shape() {
        let mut state = BotState::default();
        state.ensure_channel("lobby");
        state.channel_mut("lobby").apply(Toggle::Flip(MessageKind::Spam));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["channels"]["lobby"]["toggles"]["SPAM"], true);
        assert_eq!(json["channels"]["lobby"]["toggles"]["COMMAND"], false);

        let back: BotState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}

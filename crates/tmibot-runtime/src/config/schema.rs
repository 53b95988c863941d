//! Configuration schema definitions.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! complete configuration; [`validate_config`](super::validate_config)
//! decides whether it is usable.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tmibot_core::SenderConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmibotConfig {
    /// Server, login and channel settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Outbound rate limiting.
    #[serde(default)]
    pub sender: SenderSettings,

    /// Durable state files.
    #[serde(default)]
    pub state: StateConfig,

    /// Behaviour on the way out.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Whether to read operator commands from stdin.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for TmibotConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            sender: SenderSettings::default(),
            state: StateConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
            console: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Connection
// =============================================================================

/// Chat server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Login name.
    #[serde(default)]
    pub nickname: String,

    /// OAuth token sent as the `PASS` line, including the `oauth:` prefix.
    #[serde(default)]
    pub token: String,

    /// User allowed to run the admin commands.
    #[serde(default)]
    pub admin: Option<String>,

    /// Channels joined at startup.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Capabilities requested right after login.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,

    /// Reconnect after the connection drops.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Reconnect backoff.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nickname: String::new(),
            token: String::new(),
            admin: None,
            channels: Vec::new(),
            capabilities: default_capabilities(),
            auto_reconnect: true,
            retry: RetryConfig::default(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("nickname", &self.nickname)
            .field("token", &"<redacted>")
            .field("admin", &self.admin)
            .field("channels", &self.channels)
            .field("capabilities", &self.capabilities)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ConnectionConfig {
    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lines sent right after connecting: password, nickname, capabilities.
    pub fn login_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(2 + self.capabilities.len());
        if !self.token.is_empty() {
            lines.push(format!("PASS {}", self.token));
        }
        lines.push(format!("NICK {}", self.nickname.to_lowercase()));
        lines.extend(self.capabilities.iter().map(|cap| format!("CAP REQ :{cap}")));
        lines
    }
}

fn default_host() -> String {
    "irc.chat.twitch.tv".to_string()
}

fn default_port() -> u16 {
    6667
}

fn default_capabilities() -> Vec<String> {
    ["twitch.tv/tags", "twitch.tv/membership", "twitch.tv/commands"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum consecutive failed attempts. `None` retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// The delay after `current`, capped at the maximum.
    pub fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(current.as_secs_f64() * self.backoff_multiplier),
            self.max_delay(),
        )
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Sender / State / Shutdown
// =============================================================================

/// Outbound rate limit: at most `max_sends` per `window_secs`, with a random
/// pause between writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderSettings {
    #[serde(default = "default_max_sends")]
    pub max_sends: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_pacing_min_ms")]
    pub pacing_min_ms: u64,

    #[serde(default = "default_pacing_max_ms")]
    pub pacing_max_ms: u64,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            max_sends: default_max_sends(),
            window_secs: default_window_secs(),
            pacing_min_ms: default_pacing_min_ms(),
            pacing_max_ms: default_pacing_max_ms(),
        }
    }
}

impl SenderSettings {
    /// Converts to the core sender config.
    pub fn to_sender_config(&self) -> SenderConfig {
        SenderConfig {
            max_sends: self.max_sends,
            window: Duration::from_secs(self.window_secs),
            pacing_min: Duration::from_millis(self.pacing_min_ms),
            pacing_max: Duration::from_millis(self.pacing_max_ms),
        }
    }
}

fn default_max_sends() -> usize {
    20
}

fn default_window_secs() -> u64 {
    30
}

fn default_pacing_min_ms() -> u64 {
    500
}

fn default_pacing_max_ms() -> u64 {
    1500
}

/// Where durable state lives and how often it is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    #[serde(default = "default_roles_path")]
    pub roles_path: PathBuf,

    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            roles_path: default_roles_path(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

impl StateConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/state.json")
}

fn default_roles_path() -> PathBuf {
    PathBuf::from("data/roles.json")
}

fn default_save_interval_secs() -> u64 {
    600
}

/// Shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Functional message sent to every channel before disconnecting.
    #[serde(default)]
    pub farewell: Option<String>,

    /// How long the sender gets to flush before the connection is closed.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            farewell: None,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn default_drain_timeout_secs() -> u64 {
    5
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `tmibot_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the log call.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_lines_follow_password_nick_caps_order() {
        let connection = ConnectionConfig {
            nickname: "TmiBot".into(),
            token: "oauth:secret".into(),
            ..Default::default()
        };
        assert_eq!(
            connection.login_lines(),
            vec![
                "PASS oauth:secret",
                "NICK tmibot",
                "CAP REQ :twitch.tv/tags",
                "CAP REQ :twitch.tv/membership",
                "CAP REQ :twitch.tv/commands",
            ]
        );
    }

    #[test]
    fn debug_hides_token() {
        let connection = ConnectionConfig {
            token: "oauth:secret".into(),
            ..Default::default()
        };
        assert!(!format!("{connection:?}").contains("secret"));
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 3000,
            ..Default::default()
        };
        let second = retry.next_delay(retry.initial_delay());
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(retry.next_delay(second), Duration::from_secs(3));
    }
}

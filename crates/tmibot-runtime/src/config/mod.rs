//! Configuration for the tmibot runtime.
//!
//! Layered loading (defaults, TOML files, `TMIBOT_*` environment variables,
//! programmatic overrides) plus validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ConnectionConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, RetryConfig, SenderSettings,
    ShutdownConfig, SpanEventConfig, StateConfig, TmibotConfig,
};
pub use validation::validate_config;

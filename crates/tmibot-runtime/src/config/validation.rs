//! Checks run on a loaded [`TmibotConfig`] before anything connects.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConnectionConfig, RetryConfig, SenderSettings, StateConfig, TmibotConfig};

/// Rejects configurations the bot cannot run with.
pub fn validate_config(config: &TmibotConfig) -> ConfigResult<()> {
    check_connection(&config.connection)?;
    check_retry(&config.connection.retry)?;
    check_sender(&config.sender)?;
    check_state(&config.state)
}

fn check_connection(connection: &ConnectionConfig) -> ConfigResult<()> {
    if connection.nickname.trim().is_empty() {
        return Err(ConfigError::missing("connection.nickname"));
    }
    if connection.host.trim().is_empty() {
        return Err(ConfigError::missing("connection.host"));
    }
    if connection.port == 0 {
        return Err(ConfigError::invalid("connection.port", "cannot be 0"));
    }

    if let Some(bad) = connection.channels.iter().find(|c| {
        let name = c.trim_start_matches('#');
        name.is_empty() || name.chars().any(char::is_whitespace)
    }) {
        return Err(ConfigError::invalid(
            "connection.channels",
            format!("contains unusable channel name {bad:?}"),
        ));
    }
    Ok(())
}

fn check_retry(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::invalid(
            "connection.retry.initial_delay_ms",
            "cannot be 0",
        ));
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::invalid(
            "connection.retry.max_delay_ms",
            format!("is below initial_delay_ms ({})", retry.initial_delay_ms),
        ));
    }
    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::invalid(
            "connection.retry.backoff_multiplier",
            "must be at least 1.0",
        ));
    }
    Ok(())
}

fn check_sender(sender: &SenderSettings) -> ConfigResult<()> {
    if sender.max_sends == 0 {
        return Err(ConfigError::invalid("sender.max_sends", "cannot be 0"));
    }
    if sender.window_secs == 0 {
        return Err(ConfigError::invalid("sender.window_secs", "cannot be 0"));
    }
    if sender.pacing_min_ms > sender.pacing_max_ms {
        return Err(ConfigError::invalid(
            "sender.pacing_min_ms",
            format!("exceeds pacing_max_ms ({})", sender.pacing_max_ms),
        ));
    }
    Ok(())
}

fn check_state(state: &StateConfig) -> ConfigResult<()> {
    if state.save_interval_secs == 0 {
        return Err(ConfigError::invalid("state.save_interval_secs", "cannot be 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TmibotConfig {
        let mut config = TmibotConfig::default();
        config.connection.nickname = "tmibot".into();
        config
    }

    fn rejected_key(config: &TmibotConfig) -> Option<&'static str> {
        validate_config(config).err().and_then(|e| e.key())
    }

    #[test]
    fn defaults_with_nickname_are_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn empty_nickname_is_missing() {
        let err = validate_config(&TmibotConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "connection.nickname" }));
        assert_eq!(err.to_string(), "`connection.nickname` must be set");
    }

    #[test]
    fn names_the_offending_key() {
        let mut config = valid();
        config.sender.max_sends = 0;
        assert_eq!(rejected_key(&config), Some("sender.max_sends"));

        let mut config = valid();
        config.sender.pacing_min_ms = 2000;
        assert_eq!(rejected_key(&config), Some("sender.pacing_min_ms"));

        let mut config = valid();
        config.connection.retry.backoff_multiplier = 0.5;
        assert_eq!(rejected_key(&config), Some("connection.retry.backoff_multiplier"));

        let mut config = valid();
        config.connection.retry.max_delay_ms = 10;
        assert_eq!(rejected_key(&config), Some("connection.retry.max_delay_ms"));

        let mut config = valid();
        config.connection.channels = vec!["two words".into()];
        assert_eq!(rejected_key(&config), Some("connection.channels"));

        let mut config = valid();
        config.state.save_interval_secs = 0;
        assert_eq!(rejected_key(&config), Some("state.save_interval_secs"));
    }

    #[test]
    fn hash_prefixed_channels_are_fine() {
        let mut config = valid();
        config.connection.channels = vec!["#lobby".into(), "games".into()];
        assert!(validate_config(&config).is_ok());
    }
}

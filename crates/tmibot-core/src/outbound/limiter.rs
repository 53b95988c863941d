//! Per-command cooldowns.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Tracks when each `(channel, command)` pair last fired.
///
/// Uses the tokio clock, so tests with a paused runtime control it
/// precisely.
#[derive(Debug, Default)]
pub struct CooldownLimiter {
    last_used: Mutex<HashMap<(String, String), Instant>>,
}

impl CooldownLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records now as the last use when `command` has not
    /// fired in `channel` within `window`. On denial, `renew` pushes the
    /// recorded time forward to now anyway.
    pub fn can_send(&self, channel: &str, command: &str, window: Duration, renew: bool) -> bool {
        let now = Instant::now();
        let key = (channel.to_string(), command.to_string());
        let mut last_used = self.last_used.lock();

        let allowed = last_used
            .get(&key)
            .is_none_or(|last| now.duration_since(*last) >= window);
        if allowed || renew {
            last_used.insert(key, now);
        }
        allowed
    }

    /// Whole seconds since `command` last fired in `channel`, or the full
    /// window when it never has.
    pub fn seconds_since_limit(&self, channel: &str, command: &str, window: Duration) -> u64 {
        let elapsed = self
            .last_used
            .lock()
            .get(&(channel.to_string(), command.to_string()))
            .map_or(window, |last| last.elapsed());
        elapsed.as_secs_f64().round() as u64
    }

    /// Time left until `command` may fire again in `channel`.
    pub fn remaining(&self, channel: &str, command: &str, window: Duration) -> Duration {
        self.last_used
            .lock()
            .get(&(channel.to_string(), command.to_string()))
            .map_or(Duration::ZERO, |last| window.saturating_sub(last.elapsed()))
    }

    /// Forgets every cooldown recorded for `channel`.
    pub fn clear_channel(&self, channel: &str) {
        self.last_used.lock().retain(|(c, _), _| c != channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn cooldown_window() {
        let limiter = CooldownLimiter::new();
        assert!(limiter.can_send("c", "x", WINDOW, false));

        for _ in 0..8 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(!limiter.can_send("c", "x", WINDOW, false));
        }

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.can_send("c", "x", WINDOW, false));
    }

    #[tokio::test(start_paused = true)]
    async fn renew_resets_on_denial() {
        let limiter = CooldownLimiter::new();
        assert!(limiter.can_send("c", "x", WINDOW, true));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!limiter.can_send("c", "x", WINDOW, true));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!limiter.can_send("c", "x", WINDOW, true));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.can_send("c", "x", WINDOW, true));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = CooldownLimiter::new();
        assert!(limiter.can_send("a", "x", WINDOW, false));
        assert!(limiter.can_send("b", "x", WINDOW, false));
        assert!(limiter.can_send("a", "y", WINDOW, false));
        assert!(!limiter.can_send("a", "x", WINDOW, false));

        limiter.clear_channel("a");
        assert!(limiter.can_send("a", "x", WINDOW, false));
    }

    #[tokio::test(start_paused = true)]
    async fn seconds_since_limit_rounds() {
        let limiter = CooldownLimiter::new();
        assert_eq!(limiter.seconds_since_limit("c", "x", WINDOW), 10);

        limiter.can_send("c", "x", WINDOW, false);
        tokio::time::advance(Duration::from_millis(3600)).await;
        assert_eq!(limiter.seconds_since_limit("c", "x", WINDOW), 4);
        assert_eq!(limiter.remaining("c", "x", WINDOW), Duration::from_millis(6400));
    }
}

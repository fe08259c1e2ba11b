//! Exponential backoff for reconnection.
//!
//! Both the RTM connection manager and the daemon's connect supervisor use
//! these schedules, built on `backon`.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Configuration for exponential backoff reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for each successive attempt.
    pub factor: f32,
    /// Maximum number of attempts (None = infinite).
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Schedule used by the RTM connection manager between socket attempts.
    pub fn rtm() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            factor: 2.0,
            max_attempts: None,
        }
    }

    /// Schedule used when a session's initial bootstrap fails transiently.
    /// The supervisor gives up once it runs out.
    pub fn session_connect() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            factor: 1.5,
            max_attempts: Some(20),
        }
    }

    /// Build a jittered backoff iterator from this configuration.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_jitter();
        match self.max_attempts {
            Some(max) => builder.with_max_times(max).build(),
            None => builder.without_max_times().build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_bounded() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            factor: 2.0,
            max_attempts: Some(5),
        };
        let delays: Vec<Duration> = config.backoff().collect();
        assert_eq!(delays.len(), 5);
        // Jitter adds at most one extra base delay on top of the cap
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(100)));
    }

    #[test]
    fn test_session_connect_gives_up() {
        assert_eq!(ReconnectConfig::session_connect().backoff().count(), 20);
    }

    #[test]
    fn test_unlimited_backoff_keeps_yielding() {
        let mut backoff = ReconnectConfig::rtm().backoff();
        for _ in 0..50 {
            assert!(backoff.next().is_some());
        }
    }
}

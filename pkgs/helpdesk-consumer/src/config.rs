use std::time::Duration;

/// Reconnection and liveness settings for a [`crate::StreamConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first reconnect; doubled after each attempt
    pub base_delay: Duration,
    /// Ceiling for the reconnect delay
    pub max_delay: Duration,
    /// Pause between an explicit reconnect's teardown and the new connection
    pub reconnect_delay: Duration,
    /// A stream silent for longer than this is treated as dead
    pub heartbeat_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_secs(75),
        }
    }
}

impl ConsumerConfig {
    /// How often the driver checks stream liveness
    pub fn liveness_check_interval(&self) -> Duration {
        (self.heartbeat_timeout / 3).max(Duration::from_millis(10))
    }
}

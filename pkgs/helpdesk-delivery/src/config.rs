//! Delivery configuration

use std::time::Duration;

/// Configuration for delivery channels and history paging
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Interval between heartbeat events on an open channel (default: 30s)
    pub heartbeat_interval: Duration,

    /// Number of recent messages replayed on connect (default: 50)
    pub history_window: u64,

    /// Page size when the caller does not ask for one (default: 20)
    pub page_size_default: u64,

    /// Largest page size a caller may request (default: 100)
    pub page_size_max: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            history_window: 50,
            page_size_default: 20,
            page_size_max: 100,
        }
    }
}

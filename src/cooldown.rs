// Alert state store gating repeated notifications.

use crate::config::CooldownConfig;
use crate::core::Alert;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::time::Duration;

/// Remembers when each alert (device + breach kind) was last sent. While an
/// entry is alive, the same alert is suppressed.
pub struct AlertCooldown {
    cache: Cache<String, DateTime<Utc>>,
}

impl AlertCooldown {
    /// Creates a new `AlertCooldown`.
    ///
    /// # Arguments
    /// * `window` - How long a sent alert suppresses its repeats.
    /// * `max_capacity` - The maximum number of tracked alert keys.
    pub fn new(window: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(window)
            .max_capacity(max_capacity)
            .build();
        Self { cache }
    }

    /// Returns a cooldown when it is enabled in the configuration.
    pub fn from_config(config: &CooldownConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(Duration::from_secs(config.window_seconds), config.capacity))
    }

    /// When the same alert was last sent, if it is still cooling down.
    pub async fn last_sent(&self, alert: &Alert) -> Option<DateTime<Utc>> {
        self.cache.get(&alert.state_key()).await
    }

    /// Starts the cooldown window for an alert that was just sent.
    pub async fn record_sent(&self, alert: &Alert) {
        self.cache
            .insert(alert.state_key(), alert.triggered_at)
            .await;
    }

    /// Approximate number of alert keys currently cooling down.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

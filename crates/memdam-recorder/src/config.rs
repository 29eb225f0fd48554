use std::time::Duration;

use memdam_work::WorkConfig;
use serde::{Deserialize, Serialize};

/// Tuning for the [`Synchronizer`](crate::Synchronizer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Worker threads copying events.
    pub workers: usize,
    /// Milliseconds between polls of the source store.
    pub poll_interval_ms: u64,
    /// Oldest events offered per poll.
    pub batch_size: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1000,
            batch_size: 100,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn work_config(&self, name: &str) -> WorkConfig {
        WorkConfig::new(name)
            .with_workers(self.workers)
            .with_poll_interval(self.poll_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn work_config_carries_settings() {
        let config = SyncConfig {
            workers: 3,
            poll_interval_ms: 250,
            batch_size: 10,
        };
        let work = config.work_config("sync");
        assert_eq!(work.name, "sync");
        assert_eq!(work.workers, 3);
        assert_eq!(work.poll_interval, Duration::from_millis(250));
    }
}

use std::time::Duration;

/// Configuration for a [`PollingWorkManager`](crate::PollingWorkManager).
#[derive(Clone, Debug)]
pub struct WorkConfig {
    /// Used in thread names and log fields.
    pub name: String,
    /// Number of worker threads. Zero is treated as one.
    pub workers: usize,
    /// How long the master waits between calls to the manager.
    pub poll_interval: Duration,
}

impl WorkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            name: "work".to_string(),
            workers: 4,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WorkConfig::new("sync");
        assert_eq!(config.name, "sync");
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use memdam_recorder::SyncConfig;
use serde::{Deserialize, Serialize};

/// Settings read from the `--config` TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemdamConfig {
    pub log: LogConfig,
    pub source: StoreConfig,
    pub destination: StoreConfig,
    pub sync: SyncConfig,
}

impl Default for MemdamConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            source: StoreConfig::under(Path::new("memdam-data/source")),
            destination: StoreConfig::under(Path::new("memdam-data/archive")),
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `memdam_eventstore=debug`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Folders of one Eventstore/Blobstore pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub events: PathBuf,
    pub blobs: PathBuf,
}

impl StoreConfig {
    pub fn under(root: &Path) -> Self {
        Self {
            events: root.join("events"),
            blobs: root.join("blobs"),
        }
    }
}

impl MemdamConfig {
    /// Read `path`, or use the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Replace store roots given on the command line.
    pub fn with_overrides(mut self, source: Option<&Path>, destination: Option<&Path>) -> Self {
        if let Some(root) = source {
            self.source = StoreConfig::under(root);
        }
        if let Some(root) = destination {
            self.destination = StoreConfig::under(root);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_default() {
        let config: MemdamConfig = toml::from_str("").unwrap();
        assert_eq!(config, MemdamConfig::default());
        assert_eq!(config.destination.events, Path::new("memdam-data/archive/events"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: MemdamConfig = toml::from_str(
            r#"
            [log]
            level = "debug"

            [source]
            events = "/data/events"
            blobs = "/data/blobs"

            [sync]
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.source.blobs, Path::new("/data/blobs"));
        assert_eq!(config.destination, MemdamConfig::default().destination);
        assert_eq!(config.sync.workers, 8);
        assert_eq!(config.sync.batch_size, 100);
    }

    #[test]
    fn load_reads_a_file_and_flags_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memdam.toml");
        fs::write(&path, "[sync]\npoll_interval_ms = 50\n").unwrap();

        let config = MemdamConfig::load(Some(&path))
            .unwrap()
            .with_overrides(None, Some(Path::new("/mnt/archive")));
        assert_eq!(config.sync.poll_interval_ms, 50);
        assert_eq!(config.destination.blobs, Path::new("/mnt/archive/blobs"));
        assert_eq!(config.source, MemdamConfig::default().source);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MemdamConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}

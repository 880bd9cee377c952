use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Constructor parameters for a `Database`: buffer pool capacity, checkpoint
/// cadence, page size, and on-disk file paths. Loadable from an optional
/// TOML file; every field otherwise falls back to a fixed default, so no
/// environment variables are required to start a database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Capacity of the buffer pool, in pages.
    pub buffer_pool_pages: usize,
    /// Directory holding the redo log, undo log, system key, and data files.
    pub data_dir: PathBuf,
    /// Redo log capacity, in pages.
    pub redo_log_pages: u64,
    /// Checkpoint cadence: wake on whichever of interval or bytes-written
    /// comes first.
    pub checkpoint_interval: CheckpointInterval,
    /// Initial page count for a newly created data file.
    pub initial_data_pages: u32,
    /// Initial size (pages) and growth rate of a newly created segment.
    pub initial_segment_size: u32,
    pub segment_growth_rate: u32,
    /// Whether the buffer pool may grow past `buffer_pool_pages` rather than
    /// erroring when every slot is pinned.
    pub allow_buffer_growth: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointInterval {
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    pub redo_bytes_threshold: u64,
}

impl Default for CheckpointInterval {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), redo_bytes_threshold: 4 * 1024 * 1024 }
    }
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            buffer_pool_pages: 256,
            data_dir: PathBuf::from("./cooldb-data"),
            redo_log_pages: 4096,
            checkpoint_interval: CheckpointInterval::default(),
            initial_data_pages: 64,
            initial_segment_size: 8,
            segment_growth_rate: 8,
            allow_buffer_growth: false,
        }
    }
}

impl DatabaseConfig {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn redo_log_path(&self) -> PathBuf {
        self.data_dir.join("cooldb.redo")
    }

    pub fn undo_log_path(&self) -> PathBuf {
        self.data_dir.join("cooldb.undo")
    }

    pub fn system_key_path(&self) -> PathBuf {
        self.data_dir.join("cooldb.key")
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.data_dir.join("cooldb.data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = DatabaseConfig::default();
        assert!(cfg.buffer_pool_pages > 0);
        assert!(cfg.redo_log_pages > 0);
        assert_eq!(cfg.redo_log_path().file_name().unwrap(), "cooldb.redo");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: DatabaseConfig = toml::from_str("buffer_pool_pages = 64\n").unwrap();
        assert_eq!(cfg.buffer_pool_pages, 64);
        assert_eq!(cfg.initial_segment_size, DatabaseConfig::default().initial_segment_size);
    }
}

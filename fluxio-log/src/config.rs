//! Logger configuration, loaded from TOML via `serde`.
//!
//! Based on `zest/base/async_logging.h`'s `InitAsyncLogger(file_name, file_path,
//! max_file_size, sync_interval, max_buffers)` parameter list, widened with an explicit
//! level field and deserialized the way the teacher's demo binaries load their own TOML
//! config rather than hand-parsed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::LogError;
use crate::level::LogLevel;

const DEFAULT_MAX_RECORDS_PER_FILE: usize = 5_000_000;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_SLABS: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub basename: String,
    pub directory: PathBuf,
    pub max_records_per_file: usize,
    pub flush_interval_ms: u64,
    pub max_slabs: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            basename: "fluxio".to_string(),
            directory: PathBuf::from("./logs"),
            max_records_per_file: DEFAULT_MAX_RECORDS_PER_FILE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_slabs: DEFAULT_MAX_SLABS,
        }
    }
}

impl LoggerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, LogError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, LogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    #[must_use]
    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = LoggerConfig::default();
        assert_eq!(config.max_records_per_file, 5_000_000);
        assert_eq!(config.flush_interval_ms, 1000);
        assert_eq!(config.max_slabs, 25);
        assert_eq!(config.level, LogLevel::Info);
    }

    #[test]
    fn parses_a_partial_toml_document_over_defaults() {
        let config = LoggerConfig::from_toml_str(
            r#"
            level = "debug"
            basename = "myapp"
            max_records_per_file = 10
            "#,
        )
        .expect("parse failed");
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.basename, "myapp");
        assert_eq!(config.max_records_per_file, 10);
        assert_eq!(config.max_slabs, 25);
    }
}

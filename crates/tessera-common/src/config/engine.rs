//! Engine configuration.
//!
//! Configuration can be built in code with the `with_*` methods or read
//! from a TOML document:
//!
//! ```toml
//! filename = "app.db"
//! lock_timeout_ms = 5000
//! checkpoint_pages = 500
//!
//! [collation]
//! ignore_case = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_SEGMENT_SIZES, DEFAULT_CHECKPOINT_PAGES, DEFAULT_LOCK_TIMEOUT_MS,
    DEFAULT_MAX_TRANSACTION_PAGES, LOG_FILE_SUFFIX,
};
use crate::error::{TesseraError, TesseraResult};
use crate::types::Collation;

/// Engine configuration.
///
/// # Example
///
/// ```rust
/// use tessera_common::config::EngineConfig;
///
/// let config = EngineConfig::new("app.db").with_checkpoint_pages(100);
/// assert!(config.validate().is_ok());
/// assert!(config.log_path().ends_with("app.db-log"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path of the data file. The log file sits next to it.
    pub filename: PathBuf,

    /// How long a transaction waits for its collection locks.
    pub lock_timeout_ms: u64,

    /// Buffer segment sizes in pages. The last size repeats once exhausted.
    pub cache_segment_sizes: Vec<usize>,

    /// Log size in pages that triggers an automatic checkpoint (0 disables).
    pub checkpoint_pages: u32,

    /// Writable pages a transaction may hold before a safepoint runs.
    pub max_transaction_pages: usize,

    /// Checkpoint a non-empty log when the engine opens.
    pub checkpoint_on_open: bool,

    /// Checkpoint when the engine closes.
    pub checkpoint_on_close: bool,

    /// Seed for skip-list level generation. `None` seeds from entropy.
    pub level_seed: Option<u64>,

    /// Key ordering used by every index.
    pub collation: Collation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filename: PathBuf::from("tessera.db"),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            cache_segment_sizes: DEFAULT_CACHE_SEGMENT_SIZES.to_vec(),
            checkpoint_pages: DEFAULT_CHECKPOINT_PAGES,
            max_transaction_pages: DEFAULT_MAX_TRANSACTION_PAGES,
            checkpoint_on_open: true,
            checkpoint_on_close: true,
            level_seed: None,
            collation: Collation::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for the given data file.
    #[must_use]
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Creates a small, deterministic configuration for tests.
    #[must_use]
    pub fn for_testing(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            lock_timeout_ms: 1000,
            cache_segment_sizes: vec![12, 50],
            level_seed: Some(42),
            ..Default::default()
        }
    }

    /// Parses a configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> TesseraResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| TesseraError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the buffer segment ladder.
    #[must_use]
    pub fn with_cache_segment_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.cache_segment_sizes = sizes;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub fn with_checkpoint_pages(mut self, pages: u32) -> Self {
        self.checkpoint_pages = pages;
        self
    }

    /// Sets the writable page budget per transaction.
    #[must_use]
    pub fn with_max_transaction_pages(mut self, pages: usize) -> Self {
        self.max_transaction_pages = pages;
        self
    }

    /// Enables or disables checkpoints on open and close.
    #[must_use]
    pub fn with_checkpoint_on_open_close(mut self, open: bool, close: bool) -> Self {
        self.checkpoint_on_open = open;
        self.checkpoint_on_close = close;
        self
    }

    /// Sets the skip-list level seed.
    #[must_use]
    pub fn with_level_seed(mut self, seed: u64) -> Self {
        self.level_seed = Some(seed);
        self
    }

    /// Sets the index collation.
    #[must_use]
    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }

    /// Lock timeout as a `Duration`.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Path of the log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        let mut name = self.filename.clone().into_os_string();
        name.push(LOG_FILE_SUFFIX);
        PathBuf::from(name)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> TesseraResult<()> {
        if self.filename.as_os_str().is_empty() {
            return Err(TesseraError::invalid_config("filename must not be empty"));
        }
        if self.cache_segment_sizes.is_empty() {
            return Err(TesseraError::invalid_config(
                "cache_segment_sizes must not be empty",
            ));
        }
        if self.cache_segment_sizes.iter().any(|&s| s == 0) {
            return Err(TesseraError::invalid_config(
                "cache segment sizes must be positive",
            ));
        }
        if self.max_transaction_pages == 0 {
            return Err(TesseraError::invalid_config(
                "max_transaction_pages must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_segment_sizes, vec![12, 50, 100, 500, 1000]);
        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("x.db")
            .with_lock_timeout(Duration::from_millis(250))
            .with_level_seed(7)
            .with_collation(Collation::IGNORE_CASE);
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.level_seed, Some(7));
        assert!(config.collation.ignore_case);
    }

    #[test]
    fn test_validation_failures() {
        assert!(EngineConfig::new("").validate().is_err());
        assert!(EngineConfig::new("a")
            .with_cache_segment_sizes(vec![])
            .validate()
            .is_err());
        assert!(EngineConfig::new("a")
            .with_cache_segment_sizes(vec![10, 0])
            .validate()
            .is_err());
        assert!(EngineConfig::new("a")
            .with_max_transaction_pages(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            filename = "app.db"
            lock_timeout_ms = 5000
            checkpoint_pages = 0

            [collation]
            ignore_case = true
            "#,
        )
        .unwrap();
        assert_eq!(config.filename, PathBuf::from("app.db"));
        assert_eq!(config.lock_timeout_ms, 5000);
        assert_eq!(config.checkpoint_pages, 0);
        assert!(config.collation.ignore_case);
        assert_eq!(config.max_transaction_pages, DEFAULT_MAX_TRANSACTION_PAGES);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(matches!(
            EngineConfig::from_toml_str("lock_timeout_ms = \"soon\""),
            Err(TesseraError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "filename = \"loaded.db\"").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.filename, PathBuf::from("loaded.db"));
        assert_eq!(config.log_path(), PathBuf::from("loaded.db-log"));
    }
}

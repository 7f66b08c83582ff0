//! Memory cache configuration.

use tessera_common::config::EngineConfig;
use tessera_common::constants::{DEFAULT_CACHE_SEGMENT_SIZES, PAGE_SIZE};

/// Configuration for the memory cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Pages per buffer segment; the last size repeats.
    pub segment_sizes: Vec<usize>,
}

impl CacheConfig {
    /// Creates a configuration with the default segment ladder.
    pub fn new() -> Self {
        Self {
            segment_sizes: DEFAULT_CACHE_SEGMENT_SIZES.to_vec(),
        }
    }

    /// Sets the segment ladder.
    pub fn with_segment_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.segment_sizes = sizes;
        self
    }

    /// Size of the `n`-th segment in pages.
    pub fn segment_size(&self, n: usize) -> usize {
        self.segment_sizes
            .get(n)
            .or_else(|| self.segment_sizes.last())
            .copied()
            .unwrap_or(1)
    }

    /// Memory taken by the first `segments` segments.
    pub fn memory_usage(&self, segments: usize) -> usize {
        (0..segments).map(|n| self.segment_size(n) * PAGE_SIZE).sum()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.segment_sizes.is_empty() {
            return Err("segment_sizes must not be empty");
        }
        if self.segment_sizes.iter().any(|&s| s == 0) {
            return Err("segment sizes must be > 0");
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&EngineConfig> for CacheConfig {
    fn from(config: &EngineConfig) -> Self {
        Self::new().with_segment_sizes(config.cache_segment_sizes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_ladder() {
        let config = CacheConfig::new().with_segment_sizes(vec![2, 4]);
        assert_eq!(config.segment_size(0), 2);
        assert_eq!(config.segment_size(1), 4);
        assert_eq!(config.segment_size(7), 4);
        assert_eq!(config.memory_usage(3), 10 * PAGE_SIZE);
    }

    #[test]
    fn test_validation() {
        assert!(CacheConfig::new().validate().is_ok());
        assert!(CacheConfig::new().with_segment_sizes(vec![]).validate().is_err());
        assert!(CacheConfig::new().with_segment_sizes(vec![3, 0]).validate().is_err());
    }
}

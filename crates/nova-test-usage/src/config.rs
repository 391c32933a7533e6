use std::path::Path;
use std::time::Duration;

use nova_storage::CompactionPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TestUsageError};

/// Overrides [`TestUsageConfig::flush_interval_ms`].
pub const FLUSH_INTERVAL_ENV_VAR: &str = "NOVA_TEST_USAGE_FLUSH_INTERVAL_MS";

/// Runtime settings of a [`crate::TestUsageIndex`].
///
/// ```toml
/// flush_interval_ms = 5000
/// name_cache_capacity = 1024
/// max_open_attempts = 3
///
/// [compaction]
/// min_bytes = 1048576
/// min_live_ratio = 0.5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestUsageConfig {
    /// How often the background worker flushes dirty structures to disk.
    #[serde(default = "TestUsageConfig::default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Entries kept in each interning table's read cache.
    #[serde(default = "TestUsageConfig::default_name_cache_capacity")]
    pub name_cache_capacity: usize,

    /// Store opens attempted (each after wiping the directory) before giving up.
    #[serde(default = "TestUsageConfig::default_max_open_attempts")]
    pub max_open_attempts: u32,

    #[serde(default)]
    pub compaction: CompactionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompactionConfig {
    #[serde(default = "CompactionConfig::default_min_bytes")]
    pub min_bytes: u64,

    /// Fraction of a log that must already be compact for compaction to be skipped.
    #[serde(default = "CompactionConfig::default_min_live_ratio")]
    pub min_live_ratio: f64,
}

impl Default for TestUsageConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: Self::default_flush_interval_ms(),
            name_cache_capacity: Self::default_name_cache_capacity(),
            max_open_attempts: Self::default_max_open_attempts(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_bytes: Self::default_min_bytes(),
            min_live_ratio: Self::default_min_live_ratio(),
        }
    }
}

impl CompactionConfig {
    fn default_min_bytes() -> u64 {
        1024 * 1024
    }

    fn default_min_live_ratio() -> f64 {
        0.5
    }

    pub fn policy(&self) -> CompactionPolicy {
        CompactionPolicy {
            min_bytes: self.min_bytes,
            min_live_ratio: self.min_live_ratio,
        }
    }
}

impl TestUsageConfig {
    fn default_flush_interval_ms() -> u64 {
        5_000
    }

    fn default_name_cache_capacity() -> usize {
        1024
    }

    fn default_max_open_attempts() -> u32 {
        3
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TestUsageConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Applies environment overrides (see [`FLUSH_INTERVAL_ENV_VAR`]).
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(FLUSH_INTERVAL_ENV_VAR) {
            self.flush_interval_ms = value.trim().parse().map_err(|_| TestUsageError::Config {
                message: format!("{FLUSH_INTERVAL_ENV_VAR} must be a number of milliseconds"),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(TestUsageError::Config {
                message: message.to_string(),
            })
        };
        if self.flush_interval_ms == 0 {
            return invalid("flush_interval_ms must be positive");
        }
        if self.max_open_attempts == 0 {
            return invalid("max_open_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.compaction.min_live_ratio) {
            return invalid("compaction.min_live_ratio must be between 0 and 1");
        }
        Ok(())
    }
}

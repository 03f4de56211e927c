//! Event loop configuration.
//!
//! ```toml
//! workers = 4            # 0 = one per CPU
//! poll_interval_ms = 6
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default sleep between loop cycles
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 6;

/// Upper bound accepted for `poll_interval_ms`
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// Settings for an [`EventLoop`](crate::EventLoop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Worker threads in the pool (0 = number of CPUs)
    pub workers: usize,

    /// Sleep between poll cycles, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl LoopConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: LoopConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: format!("must be at most {}", MAX_POLL_INTERVAL_MS),
            });
        }
        Ok(())
    }

    /// Worker count with `0` resolved to the number of CPUs
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Builder-style worker override
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Builder-style poll interval override
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }
}

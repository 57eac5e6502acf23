//! Scheduler configuration
//!
//! Loaded from TOML (`SchedulerConfig::from_file`) and overlaid with
//! `TASKCTX_*` environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard cap on dispatches per scheduler; `None` means unbounded
    pub max_steps: Option<u64>,
    /// Maximum events kept in the trace log
    pub trace_capacity: usize,
    /// Wall-clock milliseconds per virtual tick; 0 runs in pure virtual time
    pub tick_duration_ms: u64,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            trace_capacity: 65_536,
            tick_duration_ms: 0,
            log_filter: "info".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the step budget
    #[inline]
    #[must_use]
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Set the trace capacity
    #[inline]
    #[must_use]
    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Pace virtual time against the wall clock
    #[inline]
    #[must_use]
    pub fn with_tick_duration_ms(mut self, ms: u64) -> Self {
        self.tick_duration_ms = ms;
        self
    }

    /// Parse from a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` on malformed TOML
    /// - `ConfigError::Invalid` if a value is out of range
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Read` if the file cannot be read
    /// - `ConfigError::Parse` / `ConfigError::Invalid` as for [`from_toml_str`](Self::from_toml_str)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Overlay `TASKCTX_MAX_STEPS`, `TASKCTX_TRACE_CAPACITY`,
    /// `TASKCTX_TICK_MS` and `TASKCTX_LOG` from the environment
    ///
    /// # Errors
    /// - `ConfigError::Invalid` if a variable does not parse
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup("TASKCTX_MAX_STEPS") {
            self.max_steps = Some(parse_var("TASKCTX_MAX_STEPS", &raw)?);
        }
        if let Some(raw) = lookup("TASKCTX_TRACE_CAPACITY") {
            self.trace_capacity = parse_var("TASKCTX_TRACE_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("TASKCTX_TICK_MS") {
            self.tick_duration_ms = parse_var("TASKCTX_TICK_MS", &raw)?;
        }
        if let Some(raw) = lookup("TASKCTX_LOG") {
            self.log_filter = raw;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// - `ConfigError::Invalid` describing the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == Some(0) {
            return Err(ConfigError::Invalid("max_steps must be positive".to_string()));
        }
        if self.trace_capacity == 0 {
            return Err(ConfigError::Invalid(
                "trace_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<V: std::str::FromStr>(key: &str, raw: &str) -> Result<V, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={raw:?} is not a valid number")))
}

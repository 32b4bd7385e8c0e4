//! Engine configuration
//!
//! Defaults come from [`crate::constants`]; each value can be overridden by an
//! environment variable:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OUTLINE_DATABASE_PATH` | `database_path` |
//! | `OUTLINE_QUEUE_CAPACITY` | `queue_capacity` |
//! | `OUTLINE_EVENT_CAPACITY` | `event_channel_capacity` |

use crate::constants::{
    DEFAULT_DATABASE_PATH, DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_QUEUE_CAPACITY,
    ENV_DATABASE_PATH, ENV_EVENT_CAPACITY, ENV_QUEUE_CAPACITY,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidCapacity { var: String, value: String },

    #[error("{var} must not be empty")]
    EmptyValue { var: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineConfig {
    pub database_path: PathBuf,
    pub queue_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl OutlineConfig {
    /// Defaults with a specific database file
    pub fn with_database_path(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            if path.trim().is_empty() {
                return Err(ConfigError::EmptyValue {
                    var: ENV_DATABASE_PATH.to_string(),
                });
            }
            config.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            config.queue_capacity = parse_capacity(ENV_QUEUE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_EVENT_CAPACITY) {
            config.event_channel_capacity = parse_capacity(ENV_EVENT_CAPACITY, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Capacities must be positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                var: ENV_QUEUE_CAPACITY.to_string(),
                value: "0".to_string(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                var: ENV_EVENT_CAPACITY.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_capacity(var: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidCapacity {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

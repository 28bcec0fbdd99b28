//! Runtime configuration for the convergence core.
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file in the working directory.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_RECREATE_ON_NO_DISK_SPACE: &str = "CONVERGE_RECREATE_ON_NO_DISK_SPACE";
pub const ENV_NOT_APPLICABLE: &str = "CONVERGE_NOT_APPLICABLE";
pub const ENV_LOG: &str = "CONVERGE_LOG";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergeConfig {
    /// Recreate the VM and retry once when attach reports a retryable
    /// capacity error.
    pub recreate_on_no_disk_space: bool,
    /// Placeholder rendered for absent optional fields in orphan listings.
    pub not_applicable: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            recreate_on_no_disk_space: true,
            not_applicable: "n/a".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl ConvergeConfig {
    /// Load from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RECREATE_ON_NO_DISK_SPACE) {
            config.recreate_on_no_disk_space = parse_bool(ENV_RECREATE_ON_NO_DISK_SPACE, &raw)?;
        }
        if let Some(value) = lookup(ENV_NOT_APPLICABLE) {
            config.not_applicable = value;
        }
        if let Some(value) = lookup(ENV_LOG) {
            config.log_filter = value;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

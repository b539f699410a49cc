//! Coordinator configuration parsing and validation.
//!
//! Configuration is TOML. Every field has a default so an empty file is a
//! valid stub deployment; `validate` is called after parsing and fails
//! closed on values the coordinator cannot run with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::{humantime_serde, RetryConfig};
use crate::confirm::ValidatorPolicy;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The TOML could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A parsed value is outside its legal range.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Path of the Unix socket the protocol server listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Path of the SQLite ledger database. When absent the coordinator runs
    /// on the in-memory ledger and nothing survives a restart.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Deadline applied to create requests that do not name one, in days.
    #[serde(default = "default_deadline_days")]
    pub default_deadline_days: u32,

    /// How often the background sweeper looks for expired bounties.
    #[serde(default = "default_sweep_interval")]
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Which proof-of-view validator the confirmation engine runs.
    #[serde(default)]
    pub validator: ValidatorPolicy,

    /// Retry policy for the funding-proof lookup at bounty creation. The
    /// default makes exactly one attempt: a missing proof fails fast as
    /// insufficient funds rather than holding the request open.
    #[serde(default = "RetryConfig::fail_fast")]
    pub funding_retry: RetryConfig,

    /// Retry policy for the ad-posting collaborator.
    #[serde(default)]
    pub posting_retry: RetryConfig,

    /// Retry policy for the settlement collaborator.
    #[serde(default)]
    pub settlement_retry: RetryConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("adbounty.sock")
}

const fn default_deadline_days() -> u32 {
    7
}

const fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            database_path: None,
            default_deadline_days: default_deadline_days(),
            sweep_interval: default_sweep_interval(),
            validator: ValidatorPolicy::default(),
            funding_retry: RetryConfig::fail_fast(),
            posting_retry: RetryConfig::default(),
            settlement_retry: RetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_deadline_days == 0 {
            return Err(ConfigError::Validation(
                "default_deadline_days must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Validation(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        for (name, retry) in [
            ("funding_retry", &self.funding_retry),
            ("posting_retry", &self.posting_retry),
            ("settlement_retry", &self.settlement_retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_valid() {
        let config = CoordinatorConfig::from_toml("").unwrap();
        assert_eq!(config.default_deadline_days, 7);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.validator, ValidatorPolicy::Auto);
        assert_eq!(config.funding_retry.max_attempts, 1);
    }

    #[test]
    fn test_round_trip_with_humantime_durations() {
        let config = CoordinatorConfig {
            sweep_interval: Duration::from_secs(90),
            validator: ValidatorPolicy::Manual,
            ..Default::default()
        };
        let toml = config.to_toml().unwrap();
        let parsed = CoordinatorConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed.sweep_interval, Duration::from_secs(90));
        assert_eq!(parsed.validator, ValidatorPolicy::Manual);
    }

    #[test]
    fn test_zero_deadline_days_rejected() {
        let err = CoordinatorConfig::from_toml("default_deadline_days = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let err = CoordinatorConfig::from_toml(
            r#"
            [posting_retry]
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_validator_policy_parses() {
        let config = CoordinatorConfig::from_toml(r#"validator = "proof_required""#).unwrap();
        assert_eq!(config.validator, ValidatorPolicy::ProofRequired);
    }
}

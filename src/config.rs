//! Verifier configuration.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! is a valid configuration. Command-line flags are applied on top.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::VerifyError;

const DEFAULT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_WATCHDOG_GRACE_MS: u64 = 500;
const DEFAULT_SEED: u64 = 0x5eed_0f_d0c5;
const DEFAULT_STEP_CHECK_INTERVAL: u32 = 256;

/// Settings for one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    /// Wall-clock ceiling per snippet, in milliseconds.
    pub timeout_ms: u64,
    /// Extra time granted to an evaluation past its ceiling before the
    /// executor abandons it. `None` waits for the evaluation however long
    /// it takes and relies on the runtime polling its budget.
    pub watchdog_grace_ms: Option<u64>,
    /// Worker threads for cross-group parallelism. `1` runs everything on
    /// the orchestrator's thread.
    pub jobs: usize,
    /// Seed for every context's PRNG.
    pub seed: u64,
    /// How many evaluation steps pass between clock reads.
    pub step_check_interval: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            watchdog_grace_ms: Some(DEFAULT_WATCHDOG_GRACE_MS),
            jobs: 1,
            seed: DEFAULT_SEED,
            step_check_interval: DEFAULT_STEP_CHECK_INTERVAL,
        }
    }
}

impl VerifyConfig {
    /// Loads a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let text = fs::read_to_string(path).map_err(|source| VerifyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: VerifyConfig = if text.trim().is_empty() {
            VerifyConfig::default()
        } else {
            serde_yaml::from_str(&text).map_err(|e| VerifyError::Config {
                message: format!("{}: {}", path.display(), e),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the verifier cannot run with.
    pub fn validate(&self) -> Result<(), VerifyError> {
        if self.timeout_ms == 0 {
            return Err(VerifyError::Config {
                message: "timeout_ms must be greater than zero".into(),
            });
        }
        if self.jobs == 0 {
            return Err(VerifyError::Config {
                message: "jobs must be at least 1".into(),
            });
        }
        if self.step_check_interval == 0 {
            return Err(VerifyError::Config {
                message: "step_check_interval must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn watchdog_grace(&self) -> Option<Duration> {
        self.watchdog_grace_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: VerifyConfig = serde_yaml::from_str("timeout_ms: 150\njobs: 4\n").unwrap();
        assert_eq!(config.timeout_ms, 150);
        assert_eq!(config.jobs, 4);
        assert_eq!(config.seed, VerifyConfig::default().seed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<VerifyConfig, _> = serde_yaml::from_str("timeout: 5\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn zero_jobs_is_invalid() {
        let config = VerifyConfig {
            jobs: 0,
            ..VerifyConfig::default()
        };
        assert!(matches!(config.validate(), Err(VerifyError::Config { .. })));
    }
}

//! Runtime configuration, loaded from YAML.

use clicker_econ::AccrualPolicy;
use persistence::default_save_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("tick_interval_ms must be > 0")]
    ZeroTickInterval,
}

/// Session settings. Every field has a default; unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Period of the passive-income ticker.
    pub tick_interval_ms: u64,
    /// Where the JSON save lives.
    pub save_path: PathBuf,
    /// Keep sub-unit income between ticks instead of dropping it.
    pub carry_fractional_income: bool,
    /// Credit income for the time since the last save when resuming.
    pub offline_catch_up: bool,
    /// Upper bound on credited offline time.
    pub max_offline_seconds: u64,
    /// Currency granted per completed promotional interaction.
    pub bonus_amount: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            save_path: PathBuf::from(default_save_path()),
            carry_fractional_income: true,
            offline_catch_up: false,
            max_offline_seconds: 86_400,
            bonus_amount: 500,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: RuntimeConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_offline(&self) -> Duration {
        Duration::from_secs(self.max_offline_seconds)
    }

    pub fn accrual_policy(&self) -> AccrualPolicy {
        if self.carry_fractional_income {
            AccrualPolicy::CarryRemainder
        } else {
            AccrualPolicy::Truncate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg = RuntimeConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
        assert_eq!(cfg.tick_interval(), Duration::from_millis(100));
        assert_eq!(cfg.accrual_policy(), AccrualPolicy::CarryRemainder);
    }

    #[test]
    fn partial_yaml_overrides() {
        let cfg = RuntimeConfig::from_yaml_str(
            "tick_interval_ms: 250\ncarry_fractional_income: false\nsave_path: /tmp/x.json\n",
        )
        .unwrap();
        assert_eq!(cfg.tick_interval_ms, 250);
        assert_eq!(cfg.accrual_policy(), AccrualPolicy::Truncate);
        assert_eq!(cfg.save_path, PathBuf::from("/tmp/x.json"));
        assert_eq!(cfg.bonus_amount, 500);
    }

    #[test]
    fn rejects_zero_interval_and_typos() {
        assert!(matches!(
            RuntimeConfig::from_yaml_str("tick_interval_ms: 0"),
            Err(ConfigError::ZeroTickInterval)
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml_str("tick_interval: 10"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RuntimeConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

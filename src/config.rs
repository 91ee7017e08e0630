//! Engine configuration: timing resolution and matching tolerances.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Time;

/// Ticks per second with the default (whole-second) resolution.
pub const TICKS_PER_SECOND: Time = 1;
/// Ticks per second when sub-second timing is enabled.
pub const SUBSECOND_TICKS_PER_SECOND: Time = 10;

/// Configuration load failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Config text is not valid TOML for [`EngineConfig`].
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables of the matching and evaluation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Record times in tenths of a second instead of whole seconds.
    pub subsecond_timing: bool,
    /// Window, in seconds, within which a second punch of the same code is
    /// treated as a re-read of an already bound punch.
    pub duplicate_tolerance_secs: Time,
    /// Default maximum running time in seconds for classes without their own.
    pub default_max_time_secs: Option<Time>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subsecond_timing: false,
            duplicate_tolerance_secs: 60,
            default_max_time_secs: None,
        }
    }
}

impl EngineConfig {
    /// Number of time ticks per second.
    pub fn ticks_per_second(&self) -> Time {
        if self.subsecond_timing {
            SUBSECOND_TICKS_PER_SECOND
        } else {
            TICKS_PER_SECOND
        }
    }

    /// Duplicate tolerance expressed in ticks.
    pub fn duplicate_tolerance(&self) -> Time {
        self.duplicate_tolerance_secs
            .saturating_mul(self.ticks_per_second())
    }

    /// Default max time expressed in ticks.
    pub fn default_max_time(&self) -> Option<Time> {
        self.default_max_time_secs
            .map(|s| s.saturating_mul(self.ticks_per_second()))
    }

    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a TOML file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `path` if it exists, falling back to defaults on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = Self::default();
            config.apply_env_overrides();
            return config;
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("engine config load failed, using defaults: {e}");
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Applies `ORIENTEER_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("ORIENTEER_SUBSECOND") {
            match raw.trim() {
                "1" | "true" | "yes" => self.subsecond_timing = true,
                "0" | "false" | "no" => self.subsecond_timing = false,
                other => tracing::warn!("invalid ORIENTEER_SUBSECOND, ignoring: {other}"),
            }
        }

        if let Ok(raw) = std::env::var("ORIENTEER_DUPLICATE_TOLERANCE") {
            match raw.trim().parse::<Time>() {
                Ok(v) if v >= 0 => self.duplicate_tolerance_secs = v,
                _ => tracing::warn!("invalid ORIENTEER_DUPLICATE_TOLERANCE, ignoring: {raw}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_scales_with_resolution() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.duplicate_tolerance(), 60);
        cfg.subsecond_timing = true;
        assert_eq!(cfg.duplicate_tolerance(), 600);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml_str("subsecond_timing = true\n").expect("parse");
        assert!(cfg.subsecond_timing);
        assert_eq!(cfg.duplicate_tolerance_secs, 60);
        assert_eq!(cfg.default_max_time_secs, None);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(EngineConfig::from_toml_str("duplicate_tolerance_secs = \"x\"").is_err());
    }
}

//! Engine configuration
//!
//! Resolution order, highest priority first:
//! 1. Environment variables (`CORRELATE_*`)
//! 2. TOML file passed to [`EngineConfig::load`]
//! 3. Compiled defaults

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::align::DEFAULT_LAG_SENSITIVE_METRICS;
use crate::density::DEFAULT_ENERGY_KEYWORDS;
use crate::error::ConfigError;
use crate::types::{CorrelationMethod, CorrelationRequest, MissingPolicy};

/// Defaults applied to correlation requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationDefaults {
    pub method: String,
    pub min_pairs: usize,
    pub missing_policy: String,
    pub top_n: usize,
}

impl Default for CorrelationDefaults {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::Pearson.as_str().to_string(),
            min_pairs: 3,
            missing_policy: MissingPolicy::Drop.as_str().to_string(),
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Metrics recorded against the morning after the night they describe
    pub lag_sensitive_metrics: Vec<String>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            lag_sensitive_metrics: DEFAULT_LAG_SENSITIVE_METRICS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Substrings that mark a metric as an energy column
    pub energy_keywords: Vec<String>,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            energy_keywords: DEFAULT_ENERGY_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub correlation: CorrelationDefaults,
    pub alignment: AlignmentConfig,
    pub density: DensityConfig,
}

impl EngineConfig {
    /// Parse configuration from a TOML string. Missing keys take defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Self::parse(toml_str, "<string>")
    }

    /// Load `path`, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config = Self::parse(&content, &path.display().to_string())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Compiled defaults with environment overrides, validated
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse(toml_str: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `CORRELATE_MIN_PAIRS`, `CORRELATE_METHOD` and `CORRELATE_MISSING_POLICY`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numbers are ignored; names are checked by [`validate`](Self::validate).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CORRELATE_MIN_PAIRS") {
            if let Ok(v) = val.trim().parse::<usize>() {
                self.correlation.min_pairs = v;
            }
        }
        if let Some(val) = lookup("CORRELATE_METHOD") {
            self.correlation.method = val.trim().to_string();
        }
        if let Some(val) = lookup("CORRELATE_MISSING_POLICY") {
            self.correlation.missing_policy = val.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(message) = self.correlation.method.parse::<CorrelationMethod>() {
            return Err(ConfigError::ValidationFailed {
                field: "correlation.method".to_string(),
                message,
            });
        }
        if let Err(message) = self.correlation.missing_policy.parse::<MissingPolicy>() {
            return Err(ConfigError::ValidationFailed {
                field: "correlation.missing_policy".to_string(),
                message,
            });
        }
        if self.correlation.min_pairs == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "correlation.min_pairs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.correlation.top_n == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "correlation.top_n".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Request carrying the configured method, policy and minimum pairs
    pub fn default_request(&self) -> CorrelationRequest {
        CorrelationRequest {
            method: self.correlation.method.clone(),
            min_pairs: self.correlation.min_pairs,
            missing_policy: self.correlation.missing_policy.clone(),
            ..CorrelationRequest::default()
        }
    }
}

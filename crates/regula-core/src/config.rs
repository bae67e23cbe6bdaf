//! Verification configuration.
//!
//! Every field has a default, so a config file only lists what it changes:
//!
//! ```yaml
//! fail_fast: true
//! tier_weights:
//!   cross_rule: 0.5
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::evidence::Tier;

/// Errors that can occur when loading configuration or source libraries.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Aggregation weight of each tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierWeights {
    pub schema: f64,
    pub lexical: f64,
    pub semantic: f64,
    pub entailment: f64,
    pub cross_rule: f64,
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            schema: 1.0,
            lexical: 0.8,
            semantic: 0.9,
            entailment: 0.95,
            cross_rule: 0.7,
        }
    }
}

impl TierWeights {
    pub fn weight(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Schema => self.schema,
            Tier::Lexical => self.lexical,
            Tier::Semantic => self.semantic,
            Tier::Entailment => self.entailment,
            Tier::CrossRule => self.cross_rule,
        }
    }
}

/// Score bands shared by the model and heuristic similarity paths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityBands {
    /// At or above: high similarity, `pass`
    pub high: f64,

    /// At or above (and below `high`): medium similarity, `warning`
    pub medium: f64,
}

impl Default for SimilarityBands {
    fn default() -> Self {
        Self {
            high: 0.75,
            medium: 0.50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    pub tier_weights: TierWeights,

    /// Weight of evidence whose tier has no configured weight
    pub default_weight: f64,

    pub similarity: SimilarityBands,

    /// Tiers run when the caller does not name any
    pub default_tiers: Vec<u8>,

    pub fail_fast: bool,

    /// Recorded as `verified_by` on computed summaries
    pub verified_by: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            tier_weights: TierWeights::default(),
            default_weight: 0.5,
            similarity: SimilarityBands::default(),
            default_tiers: vec![0, 1, 2, 3, 4],
            fail_fast: false,
            verified_by: "system".to_string(),
        }
    }
}

impl VerificationConfig {
    /// Parse from YAML (or JSON) text and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: VerificationConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML or JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for tier in Tier::ALL {
            check_unit(&format!("tier_weights.{}", tier.number()), self.tier_weights.weight(tier))?;
        }
        check_unit("default_weight", self.default_weight)?;
        check_unit("similarity.high", self.similarity.high)?;
        check_unit("similarity.medium", self.similarity.medium)?;
        if self.similarity.medium > self.similarity.high {
            return Err(invalid("similarity", "medium band must not exceed high band"));
        }
        if let Some(bad) = self.default_tiers.iter().find(|t| Tier::try_from(**t).is_err()) {
            return Err(invalid("default_tiers", &format!("unknown tier {}", bad)));
        }
        if self.verified_by.trim().is_empty() {
            return Err(invalid("verified_by", "must not be empty"));
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("{} is outside [0, 1]", value)))
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerificationConfig::default();
        assert_eq!(config.tier_weights.weight(Tier::Entailment), 0.95);
        assert_eq!(config.similarity.high, 0.75);
        assert_eq!(config.default_tiers, vec![0, 1, 2, 3, 4]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = VerificationConfig::from_yaml(
            r#"
fail_fast: true
tier_weights:
  cross_rule: 0.5
"#,
        )
        .unwrap();

        assert!(config.fail_fast);
        assert_eq!(config.tier_weights.cross_rule, 0.5);
        assert_eq!(config.tier_weights.schema, 1.0);
        assert_eq!(config.verified_by, "system");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = VerificationConfig::from_yaml("default_tiers: [0, 7]").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "default_tiers"
        ));

        let err =
            VerificationConfig::from_yaml("similarity: {high: 0.4, medium: 0.6}").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        assert!(VerificationConfig::from_yaml("tier_weights: {schema: 1.5}").is_err());
        assert!(VerificationConfig::from_yaml("unknown_key: 1").is_err());
    }
}

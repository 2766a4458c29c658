//! Construction-time configuration errors
//!
//! Evaluation never fails: out-of-range numbers are clamped and policy breaches
//! come back as violations. Only a malformed configuration aborts, and it does so
//! before the first evaluation runs.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown regime '{0}' (not in frozen registry v{1})")]
    UnknownRegime(String, u32),

    #[error("Unknown macro flag '{0}'")]
    UnknownMacroFlag(String),

    #[error("Unknown policy preset '{0}' (expected CONSERVATIVE, BALANCED or AGGRESSIVE)")]
    UnknownPreset(String),

    #[error("Unknown risk level '{0}'")]
    UnknownRiskLevel(String),

    #[error("Regime registry version mismatch: config expects v{expected}, engine ships v{actual}")]
    RegistryVersion { expected: u32, actual: u32 },

    #[error("Invalid tier weights: {0}")]
    InvalidTierWeights(String),

    #[error("Invalid preset {preset}: {reason}")]
    InvalidPreset { preset: String, reason: String },

    #[error("Invalid threshold {name}={value}: {reason}")]
    InvalidThreshold {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

/// Check that a configured value lies in [0, 1]
pub(crate) fn require_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name,
            value,
            reason: "must be within [0, 1]",
        })
    }
}

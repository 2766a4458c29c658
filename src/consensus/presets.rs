//! Policy presets
//!
//! Three named presets cover the usual risk appetites. A deployment can
//! override individual fields; overrides are merged and validated once at
//! construction so evaluation never sees a missing or malformed threshold.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{require_unit, ConfigError};
use crate::types::{ConflictLevel, TradeMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyPreset {
    Conservative,
    Balanced,
    Aggressive,
}

impl Default for PolicyPreset {
    fn default() -> Self {
        PolicyPreset::Balanced
    }
}

impl PolicyPreset {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_uppercase().as_str() {
            "CONSERVATIVE" => Ok(PolicyPreset::Conservative),
            "BALANCED" => Ok(PolicyPreset::Balanced),
            "AGGRESSIVE" => Ok(PolicyPreset::Aggressive),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    /// Built-in thresholds for this preset
    pub fn config(&self) -> PresetConfig {
        match self {
            PolicyPreset::Conservative => PresetConfig {
                preset: *self,
                min_confidence: 0.30,
                min_reliability: 0.70,
                min_consensus_index: 40,
                max_conflict_level: ConflictLevel::Low,
                max_tail_risk: 0.20,
                max_size_multiplier: 0.50,
                max_mode: TradeMode::Partial,
            },
            PolicyPreset::Balanced => PresetConfig {
                preset: *self,
                min_confidence: 0.25,
                min_reliability: 0.55,
                min_consensus_index: 30,
                max_conflict_level: ConflictLevel::Moderate,
                max_tail_risk: 0.35,
                max_size_multiplier: 0.75,
                max_mode: TradeMode::Full,
            },
            PolicyPreset::Aggressive => PresetConfig {
                preset: *self,
                min_confidence: 0.20,
                min_reliability: 0.40,
                min_consensus_index: 20,
                max_conflict_level: ConflictLevel::High,
                max_tail_risk: 0.50,
                max_size_multiplier: 1.00,
                max_mode: TradeMode::Full,
            },
        }
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyPreset::Conservative => write!(f, "CONSERVATIVE"),
            PolicyPreset::Balanced => write!(f, "BALANCED"),
            PolicyPreset::Aggressive => write!(f, "AGGRESSIVE"),
        }
    }
}

/// Fully resolved preset thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub preset: PolicyPreset,
    /// Minimum weighted evidence confidence (0.0 - 1.0]
    pub min_confidence: f64,
    /// Minimum evidence reliability (0.0 - 1.0)
    pub min_reliability: f64,
    /// Minimum consensus index (1 - 100)
    pub min_consensus_index: u8,
    /// Highest conflict level still tradeable
    pub max_conflict_level: ConflictLevel,
    /// Highest tail risk still tradeable (0.0 - 1.0)
    pub max_tail_risk: f64,
    /// Size multiplier cap (0.0 - 1.0)
    pub max_size_multiplier: f64,
    /// Highest mode this preset may reach
    pub max_mode: TradeMode,
}

impl Default for PresetConfig {
    fn default() -> Self {
        PolicyPreset::default().config()
    }
}

impl PresetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPreset {
            preset: self.preset.to_string(),
            reason,
        };

        if !(self.min_confidence > 0.0 && self.min_confidence <= 1.0) {
            return Err(invalid(format!(
                "min_confidence must be in (0, 1], got {}",
                self.min_confidence
            )));
        }
        if self.min_consensus_index == 0 || self.min_consensus_index > 100 {
            return Err(invalid(format!(
                "min_consensus_index must be in 1..=100, got {}",
                self.min_consensus_index
            )));
        }
        if self.max_mode == TradeMode::NoTrade {
            return Err(invalid("max_mode NO_TRADE would never trade".to_string()));
        }
        require_unit("policy.min_reliability", self.min_reliability)?;
        require_unit("policy.max_tail_risk", self.max_tail_risk)?;
        require_unit("policy.max_size_multiplier", self.max_size_multiplier)?;
        Ok(())
    }
}

/// Partial preset: unset fields keep the base preset's values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetOverrides {
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub min_reliability: Option<f64>,
    #[serde(default)]
    pub min_consensus_index: Option<u8>,
    #[serde(default)]
    pub max_conflict_level: Option<ConflictLevel>,
    #[serde(default)]
    pub max_tail_risk: Option<f64>,
    #[serde(default)]
    pub max_size_multiplier: Option<f64>,
    #[serde(default)]
    pub max_mode: Option<TradeMode>,
}

impl PresetOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge onto a base preset and validate the result
    pub fn resolve(&self, base: PolicyPreset) -> Result<PresetConfig, ConfigError> {
        let d = base.config();
        let resolved = PresetConfig {
            preset: base,
            min_confidence: self.min_confidence.unwrap_or(d.min_confidence),
            min_reliability: self.min_reliability.unwrap_or(d.min_reliability),
            min_consensus_index: self.min_consensus_index.unwrap_or(d.min_consensus_index),
            max_conflict_level: self.max_conflict_level.unwrap_or(d.max_conflict_level),
            max_tail_risk: self.max_tail_risk.unwrap_or(d.max_tail_risk),
            max_size_multiplier: self.max_size_multiplier.unwrap_or(d.max_size_multiplier),
            max_mode: self.max_mode.unwrap_or(d.max_mode),
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

//! Configuration management for the verdict engine
//!
//! Loads from YAML files + environment variables via .env. Raw values are
//! turned into validated `EngineSettings` once, before any evaluation runs.

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::consensus::{
    ConflictConfig, PolicyPreset, PresetConfig, PresetOverrides, WeightingConfig,
};
use crate::error::{require_unit, ConfigError};
use crate::invariants::{ConfidenceCaps, InvariantSettings};
use crate::regime::RegimeRegistry;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub weighting: WeightingConfig,
    pub conflict: ConflictConfig,
    pub policy: PolicyConfig,
    pub invariants: InvariantsConfig,
    pub audit: AuditConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// CONSERVATIVE, BALANCED or AGGRESSIVE
    pub preset: String,
    /// Per-field overrides merged onto the preset
    #[serde(default)]
    pub overrides: PresetOverrides,
    /// Dead band around zero for the net vote score
    pub neutral_epsilon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvariantsConfig {
    /// Registry version this deployment was written against
    pub registry_version: u32,
    pub caps: ConfidenceCaps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Downgrade ring buffer capacity
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Emit JSON log lines instead of the human format
    pub json: bool,
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

/// Validated settings ready to build engines from
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub weighting: WeightingConfig,
    pub conflict: ConflictConfig,
    pub policy: PresetConfig,
    pub neutral_epsilon: f64,
    pub invariants: InvariantSettings,
    pub audit_capacity: usize,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (VERDICT__*)
            .add_source(Environment::with_prefix("VERDICT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load with an explicit config file layered over the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("VERDICT").separator("__"))
            .build()
            .with_context(|| format!("Failed to build configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Defaults overlaid with an inline YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::defaults()?
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let caps = ConfidenceCaps::default();
        let builder = Config::builder()
            // Weighting defaults
            .set_default("weighting.structure", 0.50)?
            .set_default("weighting.tactical", 0.30)?
            .set_default("weighting.timing", 0.20)?
            .set_default("weighting.vol_shock_shift", 0.10)?
            .set_default("weighting.bear_drawdown_shift", 0.05)?
            // Conflict defaults
            .set_default("conflict.structural_lock_threshold", 0.55)?
            // Policy defaults
            .set_default("policy.preset", "BALANCED")?
            .set_default("policy.neutral_epsilon", 0.05)?
            // Invariant defaults
            .set_default("invariants.registry_version", 1)?
            .set_default("invariants.caps.low", caps.low)?
            .set_default("invariants.caps.medium", caps.medium)?
            .set_default("invariants.caps.high", caps.high)?
            .set_default("invariants.caps.extreme", caps.extreme)?
            // Audit defaults
            .set_default("audit.capacity", DEFAULT_AUDIT_CAPACITY as i64)?
            // Log defaults
            .set_default("log.json", false)?
            .set_default("log.level", "info")?;
        Ok(builder)
    }

    /// Validate everything and resolve the preset. Fails on any malformed value.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        self.weighting.validate()?;
        self.conflict.validate()?;
        require_unit("policy.neutral_epsilon", self.policy.neutral_epsilon)?;

        let preset = PolicyPreset::parse(&self.policy.preset)?;
        let policy = self.policy.overrides.resolve(preset)?;

        let invariants = InvariantSettings {
            caps: self.invariants.caps,
            registry: RegimeRegistry::for_version(self.invariants.registry_version)?,
        };
        invariants.validate()?;

        if self.audit.capacity == 0 {
            return Err(ConfigError::InvalidThreshold {
                name: "audit.capacity",
                value: 0.0,
                reason: "must be at least 1",
            });
        }

        Ok(EngineSettings {
            weighting: self.weighting.clone(),
            conflict: self.conflict.clone(),
            policy,
            neutral_epsilon: self.policy.neutral_epsilon,
            invariants,
            audit_capacity: self.audit.capacity,
        })
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "preset={}{} weights=S{:.2}/T{:.2}/t{:.2} lock={:.2} eps={:.2} registry=v{} audit={}",
            self.policy.preset,
            if self.policy.overrides.is_empty() { "" } else { "+overrides" },
            self.weighting.structure,
            self.weighting.tactical,
            self.weighting.timing,
            self.conflict.structural_lock_threshold,
            self.policy.neutral_epsilon,
            self.invariants.registry_version,
            self.audit.capacity
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConflictLevel, TradeMode};

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::from_yaml("").unwrap();
        let settings = cfg.engine_settings().unwrap();
        assert_eq!(settings.policy, PolicyPreset::Balanced.config());
        assert_eq!(settings.audit_capacity, 500);
        assert_eq!(settings.invariants.caps, ConfidenceCaps::default());
        assert!(!cfg.log.json);
    }

    #[test]
    fn test_yaml_overrides() {
        let cfg = AppConfig::from_yaml(
            "policy:\n  preset: conservative\n  overrides:\n    max_conflict_level: MODERATE\n    max_mode: FULL\n",
        )
        .unwrap();
        let settings = cfg.engine_settings().unwrap();
        assert_eq!(settings.policy.preset, PolicyPreset::Conservative);
        assert_eq!(settings.policy.max_conflict_level, ConflictLevel::Moderate);
        assert_eq!(settings.policy.max_mode, TradeMode::Full);
        assert_eq!(settings.policy.min_confidence, 0.30);
        assert!(cfg.digest().contains("+overrides"));
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let cfg = AppConfig::from_yaml("policy:\n  preset: reckless\n").unwrap();
        assert!(matches!(
            cfg.engine_settings(),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_registry_version_pinned() {
        let cfg = AppConfig::from_yaml("invariants:\n  registry_version: 2\n").unwrap();
        assert!(matches!(
            cfg.engine_settings(),
            Err(ConfigError::RegistryVersion {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_bad_weights_rejected() {
        let cfg = AppConfig::from_yaml("weighting:\n  structure: 0.9\n").unwrap();
        assert!(matches!(
            cfg.engine_settings(),
            Err(ConfigError::InvalidTierWeights(_))
        ));
    }

    #[test]
    fn test_zero_audit_capacity_rejected() {
        let cfg = AppConfig::from_yaml("audit:\n  capacity: 0\n").unwrap();
        assert!(cfg.engine_settings().is_err());
    }
}

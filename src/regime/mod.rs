//! Macro regime registry
//!
//! The regime → {risk level, confidence multiplier, STRONG-blocked, action-forbidden}
//! mapping is a frozen, versioned contract. Changing any row means bumping
//! `REGIME_REGISTRY_VERSION`; configs pin the version they were written against
//! and fail at construction on mismatch.
//!
//! Regime names and macro flags arrive as free-form strings from the macro
//! collaborator. They are parsed into closed enums here, once, so the invariant
//! pass never branches on unknown strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::audit::DowngradeTrigger;
use crate::error::{require_unit, ConfigError};
use crate::types::RiskLevel;

/// Version of the frozen regime table below
pub const REGIME_REGISTRY_VERSION: u32 = 1;

/// Market regime as published by the macro collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    RiskOn,
    Neutral,
    AltRotation,
    BtcFlightToSafety,
    RiskOff,
    FullRiskOff,
    PanicSellOff,
    CapitalExit,
}

impl Default for Regime {
    fn default() -> Self {
        Regime::Neutral
    }
}

impl Regime {
    pub const ALL: [Regime; 8] = [
        Regime::RiskOn,
        Regime::Neutral,
        Regime::AltRotation,
        Regime::BtcFlightToSafety,
        Regime::RiskOff,
        Regime::FullRiskOff,
        Regime::PanicSellOff,
        Regime::CapitalExit,
    ];

    /// Parse a registry name. Unknown names are a configuration error.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_uppercase().as_str() {
            "RISK_ON" => Ok(Regime::RiskOn),
            "NEUTRAL" => Ok(Regime::Neutral),
            "ALT_ROTATION" => Ok(Regime::AltRotation),
            "BTC_FLIGHT_TO_SAFETY" => Ok(Regime::BtcFlightToSafety),
            "RISK_OFF" => Ok(Regime::RiskOff),
            "FULL_RISK_OFF" => Ok(Regime::FullRiskOff),
            "PANIC_SELL_OFF" => Ok(Regime::PanicSellOff),
            "CAPITAL_EXIT" => Ok(Regime::CapitalExit),
            other => Err(ConfigError::UnknownRegime(
                other.to_string(),
                REGIME_REGISTRY_VERSION,
            )),
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Regime::PanicSellOff | Regime::CapitalExit)
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Regime::RiskOn => "RISK_ON",
            Regime::Neutral => "NEUTRAL",
            Regime::AltRotation => "ALT_ROTATION",
            Regime::BtcFlightToSafety => "BTC_FLIGHT_TO_SAFETY",
            Regime::RiskOff => "RISK_OFF",
            Regime::FullRiskOff => "FULL_RISK_OFF",
            Regime::PanicSellOff => "PANIC_SELL_OFF",
            Regime::CapitalExit => "CAPITAL_EXIT",
        };
        write!(f, "{}", name)
    }
}

/// Macro flag raised by the macro collaborator (Fear & Greed, dominance, flows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MacroFlag {
    MacroPanic,
    ExtremeFear,
    ExtremeGreed,
    LiquidityStress,
    WhaleDistribution,
    FundingOverheated,
    DominanceSpike,
}

impl MacroFlag {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_uppercase().as_str() {
            "MACRO_PANIC" => Ok(MacroFlag::MacroPanic),
            "EXTREME_FEAR" => Ok(MacroFlag::ExtremeFear),
            "EXTREME_GREED" => Ok(MacroFlag::ExtremeGreed),
            "LIQUIDITY_STRESS" => Ok(MacroFlag::LiquidityStress),
            "WHALE_DISTRIBUTION" => Ok(MacroFlag::WhaleDistribution),
            "FUNDING_OVERHEATED" => Ok(MacroFlag::FundingOverheated),
            "DOMINANCE_SPIKE" => Ok(MacroFlag::DominanceSpike),
            other => Err(ConfigError::UnknownMacroFlag(other.to_string())),
        }
    }

    /// Flags that forbid a STRONG verdict
    pub fn blocks_strong(&self) -> bool {
        matches!(
            self,
            MacroFlag::MacroPanic
                | MacroFlag::ExtremeFear
                | MacroFlag::LiquidityStress
                | MacroFlag::WhaleDistribution
        )
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, MacroFlag::MacroPanic | MacroFlag::ExtremeFear)
    }

    /// Audit category for downgrades caused by this flag
    pub fn trigger(&self) -> DowngradeTrigger {
        match self {
            MacroFlag::WhaleDistribution => DowngradeTrigger::WhaleRisk,
            _ => DowngradeTrigger::Stress,
        }
    }
}

impl fmt::Display for MacroFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MacroFlag::MacroPanic => "MACRO_PANIC",
            MacroFlag::ExtremeFear => "EXTREME_FEAR",
            MacroFlag::ExtremeGreed => "EXTREME_GREED",
            MacroFlag::LiquidityStress => "LIQUIDITY_STRESS",
            MacroFlag::WhaleDistribution => "WHALE_DISTRIBUTION",
            MacroFlag::FundingOverheated => "FUNDING_OVERHEATED",
            MacroFlag::DominanceSpike => "DOMINANCE_SPIKE",
        };
        write!(f, "{}", name)
    }
}

/// One row of the frozen registry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeProfile {
    pub risk_level: RiskLevel,
    pub confidence_multiplier: f64,
    /// STRONG verdicts are not allowed in this regime
    pub blocks_strong: bool,
    /// Only AVOID is allowed in this regime
    pub forbids_action: bool,
}

/// Versioned regime registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegimeRegistry {
    version: u32,
}

impl Default for RegimeRegistry {
    fn default() -> Self {
        Self::V1
    }
}

impl RegimeRegistry {
    pub const V1: RegimeRegistry = RegimeRegistry { version: 1 };

    /// Registry pinned to an expected version. Fails if the engine ships another one.
    pub fn for_version(expected: u32) -> Result<Self, ConfigError> {
        if expected != REGIME_REGISTRY_VERSION {
            return Err(ConfigError::RegistryVersion {
                expected,
                actual: REGIME_REGISTRY_VERSION,
            });
        }
        Ok(Self { version: expected })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn profile(&self, regime: Regime) -> RegimeProfile {
        let (risk_level, confidence_multiplier, blocks_strong, forbids_action) = match regime {
            Regime::RiskOn => (RiskLevel::Low, 1.00, false, false),
            Regime::Neutral => (RiskLevel::Medium, 1.00, false, false),
            Regime::AltRotation => (RiskLevel::Medium, 0.90, false, false),
            Regime::BtcFlightToSafety => (RiskLevel::High, 0.80, true, false),
            Regime::RiskOff => (RiskLevel::High, 0.75, true, false),
            Regime::FullRiskOff => (RiskLevel::Extreme, 0.50, true, true),
            Regime::PanicSellOff => (RiskLevel::Extreme, 0.40, true, false),
            Regime::CapitalExit => (RiskLevel::Extreme, 0.40, true, true),
        };
        RegimeProfile {
            risk_level,
            confidence_multiplier,
            blocks_strong,
            forbids_action,
        }
    }
}

/// Validated macro context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroContext {
    pub regime: Regime,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub active_flags: BTreeSet<MacroFlag>,
    /// Collaborator-supplied multiplier (0.0 - 1.0)
    #[serde(default = "default_multiplier")]
    pub confidence_multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for MacroContext {
    fn default() -> Self {
        Self {
            regime: Regime::Neutral,
            risk_level: RiskLevel::Medium,
            active_flags: BTreeSet::new(),
            confidence_multiplier: 1.0,
        }
    }
}

impl MacroContext {
    pub fn new(regime: Regime, risk_level: RiskLevel) -> Self {
        Self {
            regime,
            risk_level,
            ..Default::default()
        }
    }

    pub fn with_flag(mut self, flag: MacroFlag) -> Self {
        self.active_flags.insert(flag);
        self
    }

    /// Validate a raw, string-keyed context at the collaborator boundary
    pub fn from_raw(raw: &RawMacroContext) -> Result<Self, ConfigError> {
        let regime = Regime::parse(&raw.regime)?;
        let risk_level = RiskLevel::from_str(&raw.risk_level)
            .ok_or_else(|| ConfigError::UnknownRiskLevel(raw.risk_level.clone()))?;
        let active_flags = raw
            .active_flags
            .iter()
            .map(|f| MacroFlag::parse(f))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let confidence_multiplier = raw.confidence_multiplier.unwrap_or(1.0);
        require_unit("macro.confidence_multiplier", confidence_multiplier)?;

        Ok(Self {
            regime,
            risk_level,
            active_flags,
            confidence_multiplier,
        })
    }
}

/// Macro context as published over the wire
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMacroContext {
    pub regime: String,
    pub risk_level: String,
    #[serde(default)]
    pub active_flags: Vec<String>,
    #[serde(default)]
    pub confidence_multiplier: Option<f64>,
}

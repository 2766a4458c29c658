//! The ordered invariants
//!
//! Each rule looks at the immutable context plus the state left by the rules
//! before it, and reports violations and proposed downgrades. Rules never
//! mutate anything; the engine folds their outcomes.

use serde::{Deserialize, Serialize};

use super::{Adjustment, Invariant, InvariantContext, InvariantOutcome, VerdictState};
use crate::audit::DowngradeTrigger;
use crate::error::{require_unit, ConfigError};
use crate::regime::RegimeRegistry;
use crate::types::{Action, ConflictLevel, RiskLevel, Strength};

/// Per-risk-level confidence ceilings. Must not increase with risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceCaps {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub extreme: f64,
}

impl Default for ConfidenceCaps {
    fn default() -> Self {
        Self {
            low: 0.85,
            medium: 0.70,
            high: 0.55,
            extreme: 0.45,
        }
    }
}

impl ConfidenceCaps {
    pub fn cap(&self, risk: RiskLevel) -> f64 {
        match risk {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
            RiskLevel::Extreme => self.extreme,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_unit("invariants.caps.low", self.low)?;
        require_unit("invariants.caps.medium", self.medium)?;
        require_unit("invariants.caps.high", self.high)?;
        require_unit("invariants.caps.extreme", self.extreme)?;
        if !(self.low >= self.medium && self.medium >= self.high && self.high >= self.extreme) {
            return Err(ConfigError::InvalidThreshold {
                name: "invariants.caps",
                value: self.extreme,
                reason: "caps must not increase with risk level",
            });
        }
        Ok(())
    }
}

/// 1. Macro precedence: no STRONG in blocked regimes or under blocked flags.
/// Also applies the regime confidence multiplier.
#[derive(Debug, Clone)]
pub struct MacroPrecedence {
    registry: RegimeRegistry,
}

impl MacroPrecedence {
    pub fn new(registry: RegimeRegistry) -> Self {
        Self { registry }
    }
}

impl Invariant for MacroPrecedence {
    fn name(&self) -> &'static str {
        "macro_precedence"
    }

    fn check(&self, ctx: &InvariantContext, state: &VerdictState) -> InvariantOutcome {
        let mut out = InvariantOutcome::default();
        let profile = self.registry.profile(ctx.regime);

        if state.strength == Strength::Strong {
            if profile.blocks_strong {
                let reason = format!("STRONG not allowed in regime {}", ctx.regime);
                out.violations.push(format!("macro precedence: {}", reason));
                out.adjustments.push(Adjustment::strength(
                    Strength::Weak,
                    DowngradeTrigger::Regime,
                    reason,
                ));
            } else if let Some(flag) = ctx.macro_flags.iter().find(|f| f.blocks_strong()) {
                let reason = format!("STRONG not allowed under macro flag {}", flag);
                out.violations.push(format!("macro precedence: {}", reason));
                out.adjustments
                    .push(Adjustment::strength(Strength::Weak, flag.trigger(), reason));
            }
        }

        let multiplier = profile
            .confidence_multiplier
            .min(ctx.macro_confidence_multiplier);
        if multiplier < 1.0 && state.confidence > 0.0 {
            out.adjustments.push(Adjustment::confidence(
                state.confidence * multiplier,
                DowngradeTrigger::Regime,
                format!("regime {} confidence multiplier {:.2}", ctx.regime, multiplier),
            ));
        }
        out
    }
}

/// 2. Action-forbidden regimes force AVOID and block.
#[derive(Debug, Clone)]
pub struct ActionForbidden {
    registry: RegimeRegistry,
}

impl ActionForbidden {
    pub fn new(registry: RegimeRegistry) -> Self {
        Self { registry }
    }
}

impl Invariant for ActionForbidden {
    fn name(&self) -> &'static str {
        "action_forbidden"
    }

    fn check(&self, ctx: &InvariantContext, state: &VerdictState) -> InvariantOutcome {
        let mut out = InvariantOutcome::default();
        if self.registry.profile(ctx.regime).forbids_action && state.action != Action::Avoid {
            let reason = format!("{} forbidden in regime {}", state.action, ctx.regime);
            out.violations.push(format!("action forbidden: {}", reason));
            out.adjustments.push(Adjustment::avoid(DowngradeTrigger::Regime, reason));
        }
        out
    }
}

/// 3. ML never overrides rules. Direction requests are logged and ignored;
/// ML may lower confidence but never raise it.
#[derive(Debug, Clone, Default)]
pub struct MlGuard;

impl Invariant for MlGuard {
    fn name(&self) -> &'static str {
        "ml_guard"
    }

    fn check(&self, ctx: &InvariantContext, state: &VerdictState) -> InvariantOutcome {
        let mut out = InvariantOutcome::default();

        if let Some(wanted) = ctx.ml_wants_action {
            if wanted != ctx.base_action {
                out.violations.push(format!(
                    "ml override: ML wanted {} over rule action {}; ignored",
                    wanted, ctx.base_action
                ));
            }
        }

        if let Some(wanted) = ctx.ml_wants_confidence {
            if wanted > ctx.base_confidence {
                out.violations.push(format!(
                    "ml override: ML confidence {:.3} above rule confidence {:.3}; ignored",
                    wanted, ctx.base_confidence
                ));
            } else if wanted < state.confidence {
                out.adjustments.push(Adjustment::confidence(
                    wanted,
                    DowngradeTrigger::MlWarning,
                    format!("ML lowered confidence to {:.3}", wanted),
                ));
            }
        }
        out
    }
}

/// 4. Confidence ceiling by effective risk level
#[derive(Debug, Clone)]
pub struct ConfidenceCeiling {
    caps: ConfidenceCaps,
    registry: RegimeRegistry,
}

impl ConfidenceCeiling {
    pub fn new(caps: ConfidenceCaps, registry: RegimeRegistry) -> Self {
        Self { caps, registry }
    }
}

impl Invariant for ConfidenceCeiling {
    fn name(&self) -> &'static str {
        "confidence_cap"
    }

    fn check(&self, ctx: &InvariantContext, state: &VerdictState) -> InvariantOutcome {
        let mut out = InvariantOutcome::default();
        let risk = ctx.effective_risk(&self.registry);
        let cap = self.caps.cap(risk);
        if state.confidence > cap {
            let reason = format!(
                "confidence {:.3} capped at {:.2} for {} risk",
                state.confidence, cap, risk
            );
            out.violations.push(format!("confidence cap: {}", reason));
            out.adjustments.push(Adjustment::confidence(
                cap,
                DowngradeTrigger::ConfidenceCap,
                reason,
            ));
        }
        out
    }
}

/// 5. No STRONG during panic. Keyed on the base strength so an earlier
/// downgrade can't hide the panic block.
#[derive(Debug, Clone)]
pub struct PanicBlock {
    registry: RegimeRegistry,
}

impl PanicBlock {
    pub fn new(registry: RegimeRegistry) -> Self {
        Self { registry }
    }
}

impl Invariant for PanicBlock {
    fn name(&self) -> &'static str {
        "panic_block"
    }

    fn check(&self, ctx: &InvariantContext, _state: &VerdictState) -> InvariantOutcome {
        let mut out = InvariantOutcome::default();
        if ctx.base_strength == Strength::Strong && ctx.is_panic(&self.registry) {
            let reason = format!(
                "panic conditions (regime {}, risk {})",
                ctx.regime,
                ctx.effective_risk(&self.registry)
            );
            out.violations
                .push(format!("panic block: STRONG verdict under {}", reason));
            out.adjustments.push(
                Adjustment::strength(Strength::Weak, DowngradeTrigger::Panic, reason).blocking(),
            );
        }
        out
    }
}

/// 6. Conflict ceiling: CRITICAL conflict caps at WEAK, HIGH at MODERATE
#[derive(Debug, Clone, Default)]
pub struct ConflictCeiling;

impl Invariant for ConflictCeiling {
    fn name(&self) -> &'static str {
        "conflict_ceiling"
    }

    fn check(&self, ctx: &InvariantContext, state: &VerdictState) -> InvariantOutcome {
        let mut out = InvariantOutcome::default();
        let ceiling = match ctx.conflict_level {
            Some(ConflictLevel::Critical) => Strength::Weak,
            Some(ConflictLevel::High) => Strength::Moderate,
            _ => return out,
        };
        if state.strength > ceiling {
            let reason = format!(
                "{} conflict caps strength at {}",
                ctx.conflict_level.unwrap_or_default(),
                ceiling
            );
            out.violations.push(format!("conflict ceiling: {}", reason));
            out.adjustments.push(Adjustment::strength(
                ceiling,
                DowngradeTrigger::Conflict,
                reason,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{MacroFlag, Regime};

    fn ctx(regime: Regime, strength: Strength, confidence: f64) -> InvariantContext {
        InvariantContext::builder(Action::Buy)
            .regime(regime)
            .risk_level(RiskLevel::Low)
            .strength(strength)
            .confidence(confidence)
            .build()
    }

    #[test]
    fn test_caps_validate_monotone() {
        assert!(ConfidenceCaps::default().validate().is_ok());
        let bad = ConfidenceCaps {
            high: 0.9,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_macro_precedence_blocks_strong_in_regime() {
        let c = ctx(Regime::RiskOff, Strength::Strong, 0.6);
        let out = MacroPrecedence::new(RegimeRegistry::default()).check(&c, &VerdictState::from(&c));
        assert_eq!(out.violations.len(), 1);
        assert_eq!(out.adjustments[0].strength, Some(Strength::Weak));
        assert_eq!(out.adjustments[0].trigger, DowngradeTrigger::Regime);
    }

    #[test]
    fn test_macro_precedence_flag_trigger() {
        let mut c = ctx(Regime::RiskOn, Strength::Strong, 0.6);
        c.macro_flags.insert(MacroFlag::WhaleDistribution);
        let out = MacroPrecedence::new(RegimeRegistry::default()).check(&c, &VerdictState::from(&c));
        assert_eq!(out.adjustments[0].trigger, DowngradeTrigger::WhaleRisk);
    }

    #[test]
    fn test_macro_precedence_ignores_non_strong() {
        let c = ctx(Regime::RiskOn, Strength::Moderate, 0.6);
        let out = MacroPrecedence::new(RegimeRegistry::default()).check(&c, &VerdictState::from(&c));
        assert!(out.violations.is_empty());
        assert!(out.adjustments.is_empty());
    }

    #[test]
    fn test_action_forbidden() {
        let c = ctx(Regime::FullRiskOff, Strength::Weak, 0.3);
        let out = ActionForbidden::new(RegimeRegistry::default()).check(&c, &VerdictState::from(&c));
        assert_eq!(out.adjustments[0].action, Some(Action::Avoid));
        assert!(out.adjustments[0].block);
    }

    #[test]
    fn test_ml_guard_reports_but_never_redirects() {
        let mut c = ctx(Regime::RiskOn, Strength::Moderate, 0.5);
        c.ml_wants_action = Some(Action::Sell);
        c.ml_wants_confidence = Some(0.9);
        let out = MlGuard.check(&c, &VerdictState::from(&c));
        assert_eq!(out.violations.len(), 2);
        assert!(out.adjustments.is_empty());
    }

    #[test]
    fn test_ml_guard_may_lower_confidence() {
        let mut c = ctx(Regime::RiskOn, Strength::Moderate, 0.5);
        c.ml_wants_confidence = Some(0.3);
        let out = MlGuard.check(&c, &VerdictState::from(&c));
        assert!(out.violations.is_empty());
        assert_eq!(out.adjustments[0].confidence, Some(0.3));
        assert_eq!(out.adjustments[0].trigger, DowngradeTrigger::MlWarning);
    }

    #[test]
    fn test_confidence_ceiling_uses_worst_risk() {
        // Context says LOW risk but RISK_OFF is HIGH in the registry
        let c = ctx(Regime::RiskOff, Strength::Weak, 0.8);
        let out = ConfidenceCeiling::new(ConfidenceCaps::default(), RegimeRegistry::default())
            .check(&c, &VerdictState::from(&c));
        assert_eq!(out.adjustments[0].confidence, Some(0.55));
    }

    #[test]
    fn test_panic_block_keys_on_base_strength() {
        let c = ctx(Regime::PanicSellOff, Strength::Strong, 0.4);
        let mut state = VerdictState::from(&c);
        state.strength = Strength::Weak;
        let out = PanicBlock::new(RegimeRegistry::default()).check(&c, &state);
        assert!(out.adjustments[0].block);
    }

    #[test]
    fn test_conflict_ceiling() {
        let mut c = ctx(Regime::RiskOn, Strength::Strong, 0.5);
        c.conflict_level = Some(ConflictLevel::High);
        let out = ConflictCeiling.check(&c, &VerdictState::from(&c));
        assert_eq!(out.adjustments[0].strength, Some(Strength::Moderate));

        c.conflict_level = Some(ConflictLevel::Moderate);
        assert!(ConflictCeiling.check(&c, &VerdictState::from(&c)).adjustments.is_empty());
    }
}

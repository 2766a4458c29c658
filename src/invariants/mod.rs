//! Invariant Engine - downgrade-only arbitration
//!
//! Takes a base verdict (action, strength, confidence) and a macro context and
//! runs a fixed, ordered list of invariants over it. Invariants can only make a
//! verdict more cautious:
//! - strength may go down, never up
//! - confidence may go down, never up
//! - action may only change to AVOID
//!
//! Every applied downgrade is reported to the injected `DowngradeSink`.

pub mod rules;

pub use rules::{
    ActionForbidden, ConfidenceCaps, ConfidenceCeiling, ConflictCeiling, MacroPrecedence,
    MlGuard, PanicBlock,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{DowngradeLogEntry, DowngradeSink, DowngradeTrigger, EvaluationSummary};
use crate::consensus::ConsensusOutput;
use crate::error::ConfigError;
use crate::regime::{MacroContext, MacroFlag, Regime, RegimeRegistry};
use crate::types::{Action, ConflictLevel, MlOpinion, RiskLevel, Strength};

/// Everything the invariants may look at. Immutable during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantContext {
    pub regime: Regime,
    pub risk_level: RiskLevel,
    pub macro_flags: BTreeSet<MacroFlag>,
    /// Collaborator-supplied macro multiplier (0.0 - 1.0)
    pub macro_confidence_multiplier: f64,
    pub base_action: Action,
    pub base_strength: Strength,
    pub base_confidence: f64,
    pub ml_wants_action: Option<Action>,
    pub ml_wants_confidence: Option<f64>,
    pub conflict_level: Option<ConflictLevel>,
}

impl InvariantContext {
    pub fn builder(base_action: Action) -> InvariantContextBuilder {
        InvariantContextBuilder::new(base_action)
    }

    /// Build a context from a consensus result plus the current macro picture
    pub fn from_consensus(
        consensus: &ConsensusOutput,
        macro_ctx: &MacroContext,
        ml: Option<&MlOpinion>,
    ) -> Self {
        let mut builder = Self::builder(consensus.resolved.action)
            .macro_context(macro_ctx)
            .strength(Strength::from_mode(consensus.resolved.mode))
            .confidence(consensus.metrics.confidence)
            .conflict(consensus.conflict_level);
        if let Some(ml) = ml {
            builder = builder.ml(ml);
        }
        builder.build()
    }

    /// Worse of the context's risk level and the regime's registered one
    pub fn effective_risk(&self, registry: &RegimeRegistry) -> RiskLevel {
        self.risk_level.max(registry.profile(self.regime).risk_level)
    }

    pub fn is_panic(&self, registry: &RegimeRegistry) -> bool {
        self.regime.is_panic()
            || self.macro_flags.iter().any(|f| f.is_panic())
            || self.effective_risk(registry) == RiskLevel::Extreme
    }

    /// Copy with every numeric input forced into [0, 1]; NaN becomes 0
    pub fn clamped(&self) -> Self {
        Self {
            base_confidence: unit(self.base_confidence),
            macro_confidence_multiplier: unit(self.macro_confidence_multiplier),
            ml_wants_confidence: self.ml_wants_confidence.map(unit),
            ..self.clone()
        }
    }
}

/// Builder for `InvariantContext`. `build` clamps numeric inputs to [0, 1].
#[derive(Debug, Clone)]
pub struct InvariantContextBuilder {
    ctx: InvariantContext,
}

impl InvariantContextBuilder {
    fn new(base_action: Action) -> Self {
        Self {
            ctx: InvariantContext {
                regime: Regime::Neutral,
                risk_level: RiskLevel::Medium,
                macro_flags: BTreeSet::new(),
                macro_confidence_multiplier: 1.0,
                base_action,
                base_strength: Strength::Weak,
                base_confidence: 0.0,
                ml_wants_action: None,
                ml_wants_confidence: None,
                conflict_level: None,
            },
        }
    }

    pub fn regime(mut self, regime: Regime) -> Self {
        self.ctx.regime = regime;
        self
    }

    pub fn risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.ctx.risk_level = risk_level;
        self
    }

    pub fn flag(mut self, flag: MacroFlag) -> Self {
        self.ctx.macro_flags.insert(flag);
        self
    }

    pub fn macro_context(mut self, macro_ctx: &MacroContext) -> Self {
        self.ctx.regime = macro_ctx.regime;
        self.ctx.risk_level = macro_ctx.risk_level;
        self.ctx.macro_flags = macro_ctx.active_flags.clone();
        self.ctx.macro_confidence_multiplier = macro_ctx.confidence_multiplier;
        self
    }

    pub fn strength(mut self, strength: Strength) -> Self {
        self.ctx.base_strength = strength;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.ctx.base_confidence = confidence;
        self
    }

    pub fn ml(mut self, ml: &MlOpinion) -> Self {
        self.ctx.ml_wants_action = ml.wants_action;
        self.ctx.ml_wants_confidence = ml.wants_confidence;
        self
    }

    pub fn conflict(mut self, level: ConflictLevel) -> Self {
        self.ctx.conflict_level = Some(level);
        self
    }

    pub fn build(self) -> InvariantContext {
        self.ctx.clamped()
    }
}

fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Working verdict threaded through the invariants
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictState {
    pub action: Action,
    pub strength: Strength,
    pub confidence: f64,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

impl From<&InvariantContext> for VerdictState {
    fn from(ctx: &InvariantContext) -> Self {
        Self {
            action: ctx.base_action,
            strength: ctx.base_strength,
            confidence: ctx.base_confidence,
            blocked: false,
            block_reason: None,
        }
    }
}

impl VerdictState {
    /// Apply an adjustment, keeping only the parts that make the verdict more cautious
    fn apply(&mut self, adj: &Adjustment) {
        if let Some(strength) = adj.strength {
            self.strength = self.strength.min(strength);
        }
        if let Some(confidence) = adj.confidence {
            self.confidence = self.confidence.min(unit(confidence));
        }
        if adj.action == Some(Action::Avoid) {
            self.action = Action::Avoid;
        }
        if adj.block {
            self.blocked = true;
            if self.block_reason.is_none() {
                self.block_reason = Some(adj.reason.clone());
            }
        }
    }

    fn differs_from(&self, other: &VerdictState) -> bool {
        self.action != other.action
            || self.strength != other.strength
            || self.confidence != other.confidence
    }
}

/// A proposed downgrade
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub action: Option<Action>,
    pub strength: Option<Strength>,
    pub confidence: Option<f64>,
    pub block: bool,
    pub trigger: DowngradeTrigger,
    pub reason: String,
}

impl Adjustment {
    fn empty(trigger: DowngradeTrigger, reason: String) -> Self {
        Self {
            action: None,
            strength: None,
            confidence: None,
            block: false,
            trigger,
            reason,
        }
    }

    pub fn strength(strength: Strength, trigger: DowngradeTrigger, reason: String) -> Self {
        Self {
            strength: Some(strength),
            ..Self::empty(trigger, reason)
        }
    }

    pub fn confidence(confidence: f64, trigger: DowngradeTrigger, reason: String) -> Self {
        Self {
            confidence: Some(confidence),
            ..Self::empty(trigger, reason)
        }
    }

    /// Force AVOID and block
    pub fn avoid(trigger: DowngradeTrigger, reason: String) -> Self {
        Self {
            action: Some(Action::Avoid),
            block: true,
            ..Self::empty(trigger, reason)
        }
    }

    pub fn blocking(mut self) -> Self {
        self.block = true;
        self
    }
}

/// What one invariant found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvariantOutcome {
    pub violations: Vec<String>,
    pub adjustments: Vec<Adjustment>,
}

/// One rule in the ordered list
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &InvariantContext, state: &VerdictState) -> InvariantOutcome;
}

/// Result of `enforce_invariants`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantResult {
    /// True iff no violation was recorded
    pub passed: bool,
    pub violations: Vec<String>,
    pub final_action: Action,
    pub final_strength: Strength,
    pub final_confidence: f64,
    pub blocked: bool,
    pub block_reason: Option<String>,
    /// Triggers of the downgrades that changed the verdict, in order
    pub downgrades: Vec<DowngradeTrigger>,
}

/// Settings for the built-in invariant list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvariantSettings {
    pub caps: ConfidenceCaps,
    pub registry: RegimeRegistry,
}

impl InvariantSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.caps.validate()
    }
}

pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
    sink: Arc<dyn DowngradeSink>,
}

impl std::fmt::Debug for InvariantEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvariantEngine")
            .field("invariants", &self.names())
            .finish()
    }
}

impl InvariantEngine {
    /// Engine with the standard six invariants in order
    pub fn new(settings: InvariantSettings, sink: Arc<dyn DowngradeSink>) -> Result<Self, ConfigError> {
        settings.validate()?;
        let registry = settings.registry;
        let invariants: Vec<Box<dyn Invariant>> = vec![
            Box::new(MacroPrecedence::new(registry)),
            Box::new(ActionForbidden::new(registry)),
            Box::new(MlGuard),
            Box::new(ConfidenceCeiling::new(settings.caps, registry)),
            Box::new(PanicBlock::new(registry)),
            Box::new(ConflictCeiling),
        ];
        Ok(Self::with_invariants(invariants, sink))
    }

    pub fn with_invariants(invariants: Vec<Box<dyn Invariant>>, sink: Arc<dyn DowngradeSink>) -> Self {
        Self { invariants, sink }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|i| i.name()).collect()
    }

    /// Fold every invariant over the context. Out-of-range numbers in `ctx`
    /// are clamped first, so contexts built without the builder are safe too.
    pub fn enforce_invariants(&self, ctx: &InvariantContext) -> InvariantResult {
        let ctx = &ctx.clamped();
        let mut state = VerdictState::from(ctx);
        let mut violations = Vec::new();
        let mut downgrades = Vec::new();
        let snapshot = serde_json::to_value(ctx).unwrap_or(serde_json::Value::Null);

        for invariant in &self.invariants {
            let outcome = invariant.check(ctx, &state);
            violations.extend(outcome.violations);

            for adj in &outcome.adjustments {
                let before = state.clone();
                state.apply(adj);
                if !state.differs_from(&before) {
                    continue;
                }

                info!(
                    "⬇️ [{}] {} {} {:.3} → {} {} {:.3}: {}",
                    adj.trigger,
                    before.action,
                    before.strength,
                    before.confidence,
                    state.action,
                    state.strength,
                    state.confidence,
                    adj.reason
                );
                downgrades.push(adj.trigger);
                self.sink.record_downgrade(DowngradeLogEntry {
                    id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    original_action: before.action,
                    original_strength: before.strength,
                    original_confidence: before.confidence,
                    final_action: state.action,
                    final_strength: state.strength,
                    final_confidence: state.confidence,
                    reason: adj.reason.clone(),
                    trigger: adj.trigger,
                    context_snapshot: snapshot.clone(),
                });
            }
        }

        let result = InvariantResult {
            passed: violations.is_empty(),
            violations,
            final_action: state.action,
            final_strength: state.strength,
            final_confidence: state.confidence,
            blocked: state.blocked,
            block_reason: state.block_reason,
            downgrades,
        };

        debug!(
            "Invariants: {} {} {:.3} → {} {} {:.3} ({} violations, blocked={})",
            ctx.base_action,
            ctx.base_strength,
            ctx.base_confidence,
            result.final_action,
            result.final_strength,
            result.final_confidence,
            result.violations.len(),
            result.blocked
        );
        self.sink.record_evaluation(EvaluationSummary {
            passed: result.passed,
            blocked: result.blocked,
            violations: result.violations.len(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{DowngradeAudit, MockDowngradeSink};

    fn engine_with_audit() -> (InvariantEngine, Arc<DowngradeAudit>) {
        let audit = Arc::new(DowngradeAudit::default());
        let engine = InvariantEngine::new(InvariantSettings::default(), audit.clone()).unwrap();
        (engine, audit)
    }

    #[test]
    fn test_engine_order() {
        let (engine, _) = engine_with_audit();
        assert_eq!(
            engine.names(),
            vec![
                "macro_precedence",
                "action_forbidden",
                "ml_guard",
                "confidence_cap",
                "panic_block",
                "conflict_ceiling"
            ]
        );
    }

    #[test]
    fn test_clean_context_passes_untouched() {
        let (engine, audit) = engine_with_audit();
        let ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::RiskOn)
            .risk_level(RiskLevel::Low)
            .strength(Strength::Strong)
            .confidence(0.6)
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert!(result.passed);
        assert!(!result.blocked);
        assert_eq!(result.final_action, Action::Buy);
        assert_eq!(result.final_strength, Strength::Strong);
        assert_eq!(result.final_confidence, 0.6);
        assert!(audit.is_empty());
        assert_eq!(audit.metrics().evaluations, 1);
    }

    #[test]
    fn test_full_risk_off_forces_avoid() {
        let (engine, audit) = engine_with_audit();
        let ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::FullRiskOff)
            .risk_level(RiskLevel::Extreme)
            .strength(Strength::Moderate)
            .confidence(0.6)
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_action, Action::Avoid);
        assert!(result.blocked);
        assert!(!result.passed);
        // multiplier 0.5 → 0.30, below the EXTREME cap
        assert!((result.final_confidence - 0.30).abs() < 1e-9);
        assert!(result.downgrades.contains(&DowngradeTrigger::Regime));
        assert_eq!(audit.len(), result.downgrades.len());
    }

    #[test]
    fn test_regime_multiplier_is_not_a_violation() {
        let (engine, _) = engine_with_audit();
        let ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::AltRotation)
            .risk_level(RiskLevel::Low)
            .strength(Strength::Moderate)
            .confidence(0.5)
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert!(result.passed);
        assert!((result.final_confidence - 0.45).abs() < 1e-9);
        assert_eq!(result.downgrades, vec![DowngradeTrigger::Regime]);
    }

    #[test]
    fn test_panic_blocks_strong() {
        let (engine, _) = engine_with_audit();
        let ctx = InvariantContext::builder(Action::Sell)
            .regime(Regime::PanicSellOff)
            .risk_level(RiskLevel::Extreme)
            .strength(Strength::Strong)
            .confidence(0.9)
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_strength, Strength::Weak);
        assert!(result.blocked);
        assert!(result.final_confidence <= 0.45);
    }

    #[test]
    fn test_ml_cannot_raise_confidence() {
        let (engine, audit) = engine_with_audit();
        let ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::RiskOn)
            .risk_level(RiskLevel::Low)
            .strength(Strength::Moderate)
            .confidence(0.5)
            .ml(&MlOpinion {
                wants_action: Some(Action::Sell),
                wants_confidence: Some(0.95),
            })
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_action, Action::Buy);
        assert_eq!(result.final_confidence, 0.5);
        assert_eq!(result.violations.len(), 2);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_builder_clamps_inputs() {
        let ctx = InvariantContext::builder(Action::Buy)
            .confidence(1.7)
            .ml(&MlOpinion {
                wants_action: None,
                wants_confidence: Some(f64::NAN),
            })
            .build();
        assert_eq!(ctx.base_confidence, 1.0);
        assert_eq!(ctx.ml_wants_confidence, Some(0.0));
    }

    #[test]
    fn test_engine_clamps_contexts_built_without_builder() {
        let (engine, _) = engine_with_audit();
        let json = r#"{
            "regime": "RISK_ON",
            "risk_level": "LOW",
            "macro_flags": [],
            "macro_confidence_multiplier": 1.0,
            "base_action": "BUY",
            "base_strength": "MODERATE",
            "base_confidence": -0.3,
            "ml_wants_action": null,
            "ml_wants_confidence": null,
            "conflict_level": null
        }"#;
        let ctx: InvariantContext = serde_json::from_str(json).unwrap();
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_confidence, 0.0);

        let mut ctx = ctx;
        ctx.base_confidence = f64::NAN;
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_confidence, 0.0);

        ctx.base_confidence = 3.0;
        let result = engine.enforce_invariants(&ctx);
        assert!((result.final_confidence - 0.85).abs() < 1e-9);
        assert!(!result.passed);
    }

    #[test]
    fn test_out_of_range_multiplier_and_ml_are_clamped() {
        let (engine, _) = engine_with_audit();
        let mut ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::RiskOn)
            .risk_level(RiskLevel::Low)
            .strength(Strength::Moderate)
            .confidence(0.6)
            .build();
        ctx.macro_confidence_multiplier = -2.0;
        ctx.ml_wants_confidence = Some(f64::NAN);
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_confidence, 0.0);
        assert!(result.final_confidence.is_finite());
    }

    #[test]
    fn test_sink_receives_each_downgrade_and_one_summary() {
        let mut sink = MockDowngradeSink::new();
        sink.expect_record_downgrade()
            .withf(|e| e.trigger == DowngradeTrigger::Conflict && e.final_strength == Strength::Weak)
            .times(1)
            .return_const(());
        sink.expect_record_evaluation()
            .withf(|s| !s.passed && !s.blocked && s.violations == 1)
            .times(1)
            .return_const(());

        let engine = InvariantEngine::new(InvariantSettings::default(), Arc::new(sink)).unwrap();
        let ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::RiskOn)
            .risk_level(RiskLevel::Low)
            .strength(Strength::Moderate)
            .confidence(0.5)
            .conflict(ConflictLevel::Critical)
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_strength, Strength::Weak);
    }

    #[test]
    fn test_invalid_caps_rejected() {
        let settings = InvariantSettings {
            caps: ConfidenceCaps {
                low: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        let sink = Arc::new(DowngradeAudit::default());
        assert!(InvariantEngine::new(settings, sink).is_err());
    }
}

//! Invariant engine and audit integration tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use verdict_engine::audit::{DowngradeAudit, DowngradeTrigger};
    use verdict_engine::config::AppConfig;
    use verdict_engine::invariants::{InvariantContext, InvariantEngine, InvariantSettings};
    use verdict_engine::regime::{MacroContext, MacroFlag, RawMacroContext, Regime};
    use verdict_engine::types::{
        Action, ConflictLevel, Direction, DivergenceGrade, HorizonEvidence, MlOpinion, RiskLevel,
        Strength, Tier,
    };
    use verdict_engine::{ConfigError, EvaluationRequest, VerdictPipeline};

    fn engine() -> (InvariantEngine, Arc<DowngradeAudit>) {
        let audit = Arc::new(DowngradeAudit::new(16));
        let engine = InvariantEngine::new(InvariantSettings::default(), audit.clone()).unwrap();
        (engine, audit)
    }

    fn base(action: Action, strength: Strength, confidence: f64) -> InvariantContext {
        InvariantContext::builder(action)
            .regime(Regime::RiskOn)
            .risk_level(RiskLevel::Low)
            .strength(strength)
            .confidence(confidence)
            .build()
    }

    // ============================================================================
    // Ordered invariants
    // ============================================================================

    #[test]
    fn test_full_risk_off_buy_scenario() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Buy, Strength::Moderate, 0.6);
        ctx.regime = Regime::FullRiskOff;
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_action, Action::Avoid);
        assert!(result.blocked);
        assert!(result.block_reason.unwrap().contains("FULL_RISK_OFF"));
    }

    #[test]
    fn test_capital_exit_also_forbids_action() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Sell, Strength::Weak, 0.3);
        ctx.regime = Regime::CapitalExit;
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_action, Action::Avoid);
        assert!(result.blocked);
    }

    #[test]
    fn test_stress_flag_downgrades_strong() {
        let (engine, audit) = engine();
        let mut ctx = base(Action::Buy, Strength::Strong, 0.6);
        ctx.macro_flags.insert(MacroFlag::LiquidityStress);
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_strength, Strength::Weak);
        assert_eq!(result.final_action, Action::Buy);
        assert!(!result.blocked);
        assert_eq!(result.downgrades, vec![DowngradeTrigger::Stress]);

        let entry = &audit.entries()[0];
        assert_eq!(entry.original_strength, Strength::Strong);
        assert_eq!(entry.final_strength, Strength::Weak);
        assert_eq!(entry.trigger, DowngradeTrigger::Stress);
        assert_eq!(entry.context_snapshot["regime"], "RISK_ON");
    }

    #[test]
    fn test_greed_flag_does_not_block_strong() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Buy, Strength::Strong, 0.6);
        ctx.macro_flags.insert(MacroFlag::ExtremeGreed);
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_strength, Strength::Strong);
        assert!(result.passed);
    }

    #[test]
    fn test_confidence_cap_by_risk_level() {
        let (engine, _) = engine();
        for (risk, cap) in [
            (RiskLevel::Low, 0.85),
            (RiskLevel::Medium, 0.70),
            (RiskLevel::High, 0.55),
            (RiskLevel::Extreme, 0.45),
        ] {
            let mut ctx = base(Action::Buy, Strength::Weak, 0.99);
            ctx.risk_level = risk;
            let result = engine.enforce_invariants(&ctx);
            assert!(
                (result.final_confidence - cap).abs() < 1e-9,
                "{} should cap at {}",
                risk,
                cap
            );
            assert!(!result.passed);
        }
    }

    #[test]
    fn test_below_cap_is_not_a_violation() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Buy, Strength::Weak, 0.40);
        ctx.risk_level = RiskLevel::High;
        let result = engine.enforce_invariants(&ctx);
        assert!(result.passed);
        assert_eq!(result.final_confidence, 0.40);
    }

    #[test]
    fn test_extreme_fear_is_panic() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Buy, Strength::Strong, 0.4);
        ctx.macro_flags.insert(MacroFlag::ExtremeFear);
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_strength, Strength::Weak);
        assert!(result.blocked);
    }

    #[test]
    fn test_ml_lowering_is_applied_as_warning() {
        let (engine, audit) = engine();
        let ctx = InvariantContext::builder(Action::Buy)
            .regime(Regime::RiskOn)
            .risk_level(RiskLevel::Low)
            .strength(Strength::Moderate)
            .confidence(0.6)
            .ml(&MlOpinion {
                wants_action: Some(Action::Buy),
                wants_confidence: Some(0.4),
            })
            .build();
        let result = engine.enforce_invariants(&ctx);
        assert!(result.passed);
        assert_eq!(result.final_confidence, 0.4);
        assert_eq!(audit.metrics().downgrades_by_trigger[&DowngradeTrigger::MlWarning], 1);
    }

    #[test]
    fn test_ml_direction_request_changes_nothing() {
        let (engine, _) = engine();
        let plain = base(Action::Buy, Strength::Moderate, 0.6);
        let mut pushed = plain.clone();
        pushed.ml_wants_action = Some(Action::Sell);

        let a = engine.enforce_invariants(&plain);
        let b = engine.enforce_invariants(&pushed);
        assert_eq!(a.final_action, b.final_action);
        assert_eq!(a.final_strength, b.final_strength);
        assert_eq!(a.final_confidence, b.final_confidence);
        assert_eq!(b.violations.len(), 1);
    }

    #[test]
    fn test_conflict_ceiling_from_consensus_context() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Buy, Strength::Strong, 0.6);
        ctx.conflict_level = Some(ConflictLevel::High);
        let result = engine.enforce_invariants(&ctx);
        assert_eq!(result.final_strength, Strength::Moderate);
        assert_eq!(result.downgrades, vec![DowngradeTrigger::Conflict]);
    }

    #[test]
    fn test_literal_context_with_bad_numbers_stays_in_range() {
        let (engine, _) = engine();
        let mut ctx = base(Action::Sell, Strength::Moderate, 0.5);
        ctx.risk_level = RiskLevel::High;
        for raw in [-0.3, f64::NAN, f64::INFINITY, 1.4] {
            ctx.base_confidence = raw;
            let result = engine.enforce_invariants(&ctx);
            assert!(
                (0.0..=0.55).contains(&result.final_confidence),
                "{} produced {}",
                raw,
                result.final_confidence
            );
        }
    }

    // ============================================================================
    // Audit
    // ============================================================================

    #[test]
    fn test_audit_ring_evicts_oldest() {
        let (engine, audit) = engine();
        let mut ctx = base(Action::Buy, Strength::Weak, 0.99);
        for i in 0..20 {
            ctx.base_confidence = 0.90 + i as f64 * 0.001;
            engine.enforce_invariants(&ctx);
        }
        assert_eq!(audit.len(), 16);
        let m = audit.metrics();
        assert_eq!(m.evaluations, 20);
        assert_eq!(m.downgrades, 20);
        assert_eq!(m.evicted, 4);
        // oldest surviving entry came from evaluation 4
        assert!((audit.entries()[0].original_confidence - 0.904).abs() < 1e-9);
    }

    #[test]
    fn test_audit_csv_export() {
        let (engine, audit) = engine();
        let mut ctx = base(Action::Buy, Strength::Strong, 0.9);
        ctx.regime = Regime::PanicSellOff;
        engine.enforce_invariants(&ctx);

        let path = std::env::temp_dir().join(format!(
            "verdict_invariant_audit_{}.csv",
            std::process::id()
        ));
        let rows = audit.export_csv(&path).unwrap();
        assert_eq!(rows, audit.len());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("PANIC") || text.contains("REGIME"));
        std::fs::remove_file(&path).ok();
    }

    // ============================================================================
    // Pipeline
    // ============================================================================

    #[test]
    fn test_pipeline_end_to_end_from_yaml_config() {
        let settings = AppConfig::from_yaml("policy:\n  preset: AGGRESSIVE\n")
            .unwrap()
            .engine_settings()
            .unwrap();
        let (pipeline, audit) = VerdictPipeline::with_audit(&settings).unwrap();

        let raw = RawMacroContext {
            regime: "risk_off".to_string(),
            risk_level: "HIGH".to_string(),
            active_flags: vec!["WHALE_DISTRIBUTION".to_string()],
            confidence_multiplier: None,
        };
        let request = EvaluationRequest {
            evidence: vec![
                HorizonEvidence::new("7d", Tier::Timing, Direction::Bull, 0.9, DivergenceGrade::A),
                HorizonEvidence::new("30d", Tier::Tactical, Direction::Bull, 0.9, DivergenceGrade::A),
                HorizonEvidence::new("180d", Tier::Structure, Direction::Bull, 0.9, DivergenceGrade::A),
            ],
            macro_context: MacroContext::from_raw(&raw).unwrap(),
            ..Default::default()
        };

        let verdict = pipeline.evaluate(&request);
        assert_eq!(verdict.invariants.final_action, Action::Buy);
        assert_eq!(verdict.invariants.final_strength, Strength::Weak);
        assert!(verdict.invariants.final_confidence <= 0.55);
        assert!(!audit.is_empty());
        assert_eq!(verdict.fingerprint.len(), 64);
    }

    #[test]
    fn test_unknown_flag_rejected_at_boundary() {
        let raw = RawMacroContext {
            regime: "NEUTRAL".to_string(),
            risk_level: "LOW".to_string(),
            active_flags: vec!["SOLAR_FLARE".to_string()],
            confidence_multiplier: None,
        };
        assert!(matches!(
            MacroContext::from_raw(&raw),
            Err(ConfigError::UnknownMacroFlag(_))
        ));
    }
}

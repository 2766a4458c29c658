//! Verdict pipeline: consensus → invariants → audit
//!
//! One request in, one deterministic verdict out. The pipeline is immutable
//! after construction and safe to share across threads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use crate::audit::{DowngradeAudit, DowngradeSink};
use crate::config::EngineSettings;
use crate::consensus::{ConsensusEngine, ConsensusOutput, PhaseContext, PresetConfig, WeightModifiers};
use crate::error::ConfigError;
use crate::invariants::{InvariantContext, InvariantEngine, InvariantResult};
use crate::regime::{MacroContext, RawMacroContext};
use crate::types::{HorizonEvidence, MlOpinion};

/// Validated evaluation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub evidence: Vec<HorizonEvidence>,
    #[serde(default)]
    pub modifiers: WeightModifiers,
    #[serde(default)]
    pub phase: Option<PhaseContext>,
    #[serde(default, rename = "macro")]
    pub macro_context: MacroContext,
    #[serde(default)]
    pub ml: Option<MlOpinion>,
}

/// Request as it arrives from a collaborator, with string-keyed macro context
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireRequest {
    pub evidence: Vec<HorizonEvidence>,
    #[serde(default)]
    pub modifiers: WeightModifiers,
    #[serde(default)]
    pub phase: Option<PhaseContext>,
    #[serde(default, rename = "macro")]
    pub macro_context: Option<RawMacroContext>,
    #[serde(default)]
    pub ml: Option<MlOpinion>,
}

impl TryFrom<WireRequest> for EvaluationRequest {
    type Error = ConfigError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let macro_context = match &wire.macro_context {
            Some(raw) => MacroContext::from_raw(raw)?,
            None => MacroContext::default(),
        };
        Ok(Self {
            evidence: wire.evidence,
            modifiers: wire.modifiers,
            phase: wire.phase,
            macro_context,
            ml: wire.ml,
        })
    }
}

/// Final verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub consensus: ConsensusOutput,
    pub invariants: InvariantResult,
    /// SHA-256 over consensus and invariant results
    pub fingerprint: String,
}

pub struct VerdictPipeline {
    consensus: ConsensusEngine,
    policy: PresetConfig,
    invariants: InvariantEngine,
}

impl VerdictPipeline {
    pub fn new(settings: &EngineSettings, sink: Arc<dyn DowngradeSink>) -> Result<Self, ConfigError> {
        Ok(Self {
            consensus: ConsensusEngine::new(
                settings.weighting.clone(),
                settings.conflict.clone(),
                settings.neutral_epsilon,
            ),
            policy: settings.policy.clone(),
            invariants: InvariantEngine::new(settings.invariants.clone(), sink)?,
        })
    }

    /// Pipeline reporting into a fresh in-process audit log
    pub fn with_audit(settings: &EngineSettings) -> Result<(Self, Arc<DowngradeAudit>), ConfigError> {
        let audit = Arc::new(DowngradeAudit::new(settings.audit_capacity));
        let pipeline = Self::new(settings, audit.clone())?;
        Ok((pipeline, audit))
    }

    pub fn policy(&self) -> &PresetConfig {
        &self.policy
    }

    pub fn evaluate(&self, request: &EvaluationRequest) -> Verdict {
        let consensus = self.consensus.build_consensus_with(
            &request.evidence,
            request.modifiers,
            &self.policy,
            request.phase.as_ref(),
        );
        let ctx = InvariantContext::from_consensus(
            &consensus,
            &request.macro_context,
            request.ml.as_ref(),
        );
        let invariants = self.invariants.enforce_invariants(&ctx);

        let bytes = serde_json::to_vec(&(&consensus, &invariants))
            .expect("consensus output and invariant result always encode as JSON");
        let fingerprint = hex::encode(Sha256::digest(&bytes));

        info!(
            "Verdict {} {} {:.3} (base {} {}, CI={}, conflict={}, regime={}){}",
            invariants.final_action,
            invariants.final_strength,
            invariants.final_confidence,
            consensus.resolved.action,
            consensus.resolved.mode,
            consensus.consensus_index,
            consensus.conflict_level,
            request.macro_context.regime,
            if invariants.blocked { " BLOCKED" } else { "" }
        );

        Verdict {
            consensus,
            invariants,
            fingerprint,
        }
    }
}

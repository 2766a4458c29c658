//! Consensus Engine - weighted multi-tier voting
//!
//! Pipeline for one evaluation:
//! - Weighting: evidence → normalized tier weights
//! - Voting: evidence + weight → signed vote score
//! - Conflict detection: tier stances, dominance, structural lock, severity
//! - Resolution: votes + conflict + preset → action, mode, size
//!
//! Everything here is a pure function of its inputs. Identical inputs produce
//! byte-identical output, which `ConsensusOutput::fingerprint` makes checkable.

pub mod conflict;
pub mod presets;
pub mod resolver;
pub mod voting;
pub mod weighting;

pub use conflict::{ConflictConfig, ConflictDetector, ConflictResult};
pub use presets::{PolicyPreset, PresetConfig, PresetOverrides};
pub use resolver::{
    BlockingPredicate, ConsensusResolver, MarketPhase, PhaseContext, ResolvedDecision,
    ResolverInput, ResolverMetrics,
};
pub use voting::{cast_votes, vote};
pub use weighting::{compute_weights, WeightModifiers, WeightingConfig};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{ConflictLevel, Direction, HorizonEvidence, HorizonVote, Tier};

/// Result of `build_consensus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutput {
    /// Agreement strength 0-100, independent of direction
    pub consensus_index: u8,
    pub direction: Direction,
    pub dominant_tier: Tier,
    pub structural_lock: bool,
    pub conflict_level: ConflictLevel,
    pub votes: Vec<HorizonVote>,
    pub resolved: ResolvedDecision,
    /// Full conflict diagnosis (tier stances, shares, description)
    pub conflict: ConflictResult,
    pub metrics: ResolverMetrics,
    pub weights: BTreeMap<String, f64>,
}

impl ConsensusOutput {
    /// SHA-256 of the canonical JSON encoding, hex encoded
    pub fn fingerprint(&self) -> String {
        // plain structs, string-keyed maps and f64 (NaN encodes as null)
        let bytes = serde_json::to_vec(self).expect("consensus output always encodes as JSON");
        hex::encode(Sha256::digest(&bytes))
    }
}

/// round(100 * |Σ score| / Σ |score|), 0 when nothing voted or everything cancels
pub fn consensus_index(votes: &[HorizonVote]) -> u8 {
    let gross: f64 = votes.iter().map(|v| v.vote_score.abs()).sum();
    if gross <= 0.0 {
        return 0;
    }
    let net: f64 = votes.iter().map(|v| v.vote_score).sum();
    (100.0 * net.abs() / gross).round().clamp(0.0, 100.0) as u8
}

/// Consensus engine: owns the weighting, conflict and resolver configuration
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    weighting: WeightingConfig,
    detector: ConflictDetector,
    resolver: ConsensusResolver,
}

impl ConsensusEngine {
    pub fn new(weighting: WeightingConfig, conflict: ConflictConfig, epsilon: f64) -> Self {
        Self {
            weighting,
            detector: ConflictDetector::new(conflict),
            resolver: ConsensusResolver::new(epsilon),
        }
    }

    /// Build consensus with no volatility or drawdown modifiers
    pub fn build_consensus(
        &self,
        evidence: &[HorizonEvidence],
        policy: &PresetConfig,
        phase: Option<&PhaseContext>,
    ) -> ConsensusOutput {
        self.build_consensus_with(evidence, WeightModifiers::default(), policy, phase)
    }

    pub fn build_consensus_with(
        &self,
        evidence: &[HorizonEvidence],
        modifiers: WeightModifiers,
        policy: &PresetConfig,
        phase: Option<&PhaseContext>,
    ) -> ConsensusOutput {
        let weights = compute_weights(evidence, modifiers, &self.weighting);
        let votes = cast_votes(evidence, &weights);
        let conflict = self.detector.detect(&votes);
        let index = consensus_index(&votes);

        let resolved = self.resolver.resolve(&ResolverInput {
            votes: &votes,
            conflict: &conflict,
            consensus_index: index,
            preset: policy,
            phase,
        });
        let metrics = self.resolver.measure(&votes, phase);

        debug!(
            "Consensus: {} votes, index={} dir={} conflict={} lock={} → {} {} x{:.3}",
            votes.len(),
            index,
            metrics.direction,
            conflict.level,
            conflict.structural_lock,
            resolved.action,
            resolved.mode,
            resolved.size_multiplier
        );

        ConsensusOutput {
            consensus_index: index,
            direction: metrics.direction,
            dominant_tier: conflict.dominant_tier,
            structural_lock: conflict.structural_lock,
            conflict_level: conflict.level,
            weights: weighting::weights_by_horizon(evidence, &weights),
            votes,
            resolved,
            conflict,
            metrics,
        }
    }
}

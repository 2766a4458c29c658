//! Consensus resolver
//!
//! Turns votes + conflict diagnosis + a policy preset into a concrete action,
//! trade mode and size multiplier. Every preset threshold is a blocking
//! predicate; any failure means NO_TRADE. Pure and deterministic.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::conflict::ConflictResult;
use super::presets::PresetConfig;
use crate::types::{Action, Direction, HorizonVote, Tier, TradeMode};

/// Default neutral dead-band on the net vote score
pub const DEFAULT_NEUTRAL_EPSILON: f64 = 0.05;

/// Market phase published by the macro collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    Unknown,
}

impl Default for MarketPhase {
    fn default() -> Self {
        MarketPhase::Unknown
    }
}

/// Optional phase context: scales reliability and floors tail risk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    #[serde(default)]
    pub phase: MarketPhase,
    /// Phase-level reliability multiplier (0.0 - 1.0)
    #[serde(default = "default_phase_reliability")]
    pub reliability: f64,
    /// Phase-level tail risk (0.0 - 1.0)
    #[serde(default)]
    pub tail_risk: f64,
}

fn default_phase_reliability() -> f64 {
    1.0
}

impl Default for PhaseContext {
    fn default() -> Self {
        Self {
            phase: MarketPhase::Unknown,
            reliability: 1.0,
            tail_risk: 0.0,
        }
    }
}

/// Preset predicates that can block a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockingPredicate {
    NoEvidence,
    NoDirection,
    LowConfidence,
    LowConsensus,
    LowReliability,
    ConflictTooHigh,
    TailRisk,
    StructuralLockOpposed,
    ZeroSize,
}

impl fmt::Display for BlockingPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockingPredicate::NoEvidence => "NO_EVIDENCE",
            BlockingPredicate::NoDirection => "NO_DIRECTION",
            BlockingPredicate::LowConfidence => "LOW_CONFIDENCE",
            BlockingPredicate::LowConsensus => "LOW_CONSENSUS",
            BlockingPredicate::LowReliability => "LOW_RELIABILITY",
            BlockingPredicate::ConflictTooHigh => "CONFLICT_TOO_HIGH",
            BlockingPredicate::TailRisk => "TAIL_RISK",
            BlockingPredicate::StructuralLockOpposed => "STRUCTURAL_LOCK_OPPOSED",
            BlockingPredicate::ZeroSize => "ZERO_SIZE",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate measurements the predicates are evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolverMetrics {
    pub net_score: f64,
    pub direction: Direction,
    /// Weight-averaged confidence of non-vetoed votes
    pub confidence: f64,
    /// Weight-averaged grade quality, scaled by phase reliability
    pub reliability: f64,
    /// max(phase tail risk, vetoed fraction of evidence)
    pub tail_risk: f64,
    pub active_votes: usize,
}

/// Resolver output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDecision {
    pub action: Action,
    pub mode: TradeMode,
    pub size_multiplier: f64,
    /// Contributing factors, largest first
    pub reasons: Vec<String>,
    /// Names of failed blocking predicates
    pub penalties: Vec<String>,
}

impl ResolvedDecision {
    pub fn is_trade(&self) -> bool {
        self.mode != TradeMode::NoTrade
    }
}

/// Everything the resolver looks at for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct ResolverInput<'a> {
    pub votes: &'a [HorizonVote],
    pub conflict: &'a ConflictResult,
    pub consensus_index: u8,
    pub preset: &'a PresetConfig,
    pub phase: Option<&'a PhaseContext>,
}

#[derive(Debug, Clone)]
pub struct ConsensusResolver {
    epsilon: f64,
}

impl Default for ConsensusResolver {
    fn default() -> Self {
        Self::new(DEFAULT_NEUTRAL_EPSILON)
    }
}

impl ConsensusResolver {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon: epsilon.max(0.0),
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn measure(&self, votes: &[HorizonVote], phase: Option<&PhaseContext>) -> ResolverMetrics {
        let net_score: f64 = votes.iter().map(|v| v.vote_score).sum();
        let active: Vec<&HorizonVote> = votes.iter().filter(|v| !v.is_vetoed()).collect();
        let active_weight: f64 = active.iter().map(|v| v.weight).sum();

        let (confidence, quality) = if active_weight > 0.0 {
            (
                active.iter().map(|v| v.weight * v.confidence).sum::<f64>() / active_weight,
                active
                    .iter()
                    .map(|v| v.weight * v.divergence_grade.quality())
                    .sum::<f64>()
                    / active_weight,
            )
        } else {
            (0.0, 0.0)
        };

        let phase = phase.copied().unwrap_or_default();
        let phase_reliability = unit_or(phase.reliability, 1.0);
        let phase_tail = unit_or(phase.tail_risk, 0.0);

        let vetoed_fraction = if votes.is_empty() {
            0.0
        } else {
            (votes.len() - active.len()) as f64 / votes.len() as f64
        };

        ResolverMetrics {
            net_score,
            direction: Direction::from_score(net_score, self.epsilon),
            confidence: confidence.clamp(0.0, 1.0),
            reliability: (quality * phase_reliability).clamp(0.0, 1.0),
            tail_risk: phase_tail.max(vetoed_fraction),
            active_votes: active.len(),
        }
    }

    pub fn resolve(&self, input: &ResolverInput<'_>) -> ResolvedDecision {
        let preset = input.preset;
        let conflict = input.conflict;
        let ci = input.consensus_index;
        let m = self.measure(input.votes, input.phase);

        let mut blocked: Vec<(BlockingPredicate, String)> = Vec::new();
        if m.active_votes == 0 {
            blocked.push((BlockingPredicate::NoEvidence, "no usable evidence".to_string()));
        }
        if m.direction == Direction::Neutral {
            blocked.push((
                BlockingPredicate::NoDirection,
                format!("net score {:+.3} inside dead-band ±{:.3}", m.net_score, self.epsilon),
            ));
        }
        if m.confidence < preset.min_confidence {
            blocked.push((
                BlockingPredicate::LowConfidence,
                format!("confidence {:.3} < {:.3}", m.confidence, preset.min_confidence),
            ));
        }
        if ci < preset.min_consensus_index {
            blocked.push((
                BlockingPredicate::LowConsensus,
                format!("consensus index {} < {}", ci, preset.min_consensus_index),
            ));
        }
        if m.reliability < preset.min_reliability {
            blocked.push((
                BlockingPredicate::LowReliability,
                format!("reliability {:.3} < {:.3}", m.reliability, preset.min_reliability),
            ));
        }
        if conflict.level > preset.max_conflict_level {
            blocked.push((
                BlockingPredicate::ConflictTooHigh,
                format!("conflict {} > {}", conflict.level, preset.max_conflict_level),
            ));
        }
        if m.tail_risk > preset.max_tail_risk {
            blocked.push((
                BlockingPredicate::TailRisk,
                format!("tail risk {:.3} > {:.3}", m.tail_risk, preset.max_tail_risk),
            ));
        }
        let structure = conflict.stance(Tier::Structure);
        if conflict.structural_lock
            && structure.is_directional()
            && structure
                .direction()
                .map(|d| d.opposes(m.direction))
                .unwrap_or(false)
        {
            blocked.push((
                BlockingPredicate::StructuralLockOpposed,
                format!("structural lock {} against net {}", structure, m.direction),
            ));
        }

        let mut reasons = contribution_reasons(input.votes);

        if blocked.is_empty() {
            let ratio = (m.confidence / preset.min_confidence)
                .min(ci as f64 / preset.min_consensus_index as f64);
            let mode = if ratio >= 3.0 {
                TradeMode::Full
            } else if ratio >= 2.0 {
                TradeMode::Partial
            } else {
                TradeMode::Micro
            }
            .min(preset.max_mode);

            let raw = m.confidence * (ci as f64 / 100.0) * (1.0 - conflict.level.size_penalty());
            let size = raw
                .min(mode.size_cap())
                .min(preset.max_size_multiplier)
                .clamp(0.0, 1.0);

            if size > 0.0 {
                reasons.push(format!(
                    "{} mode {}: {:.1}x over minimums, conflict {}, size {:.3}",
                    preset.preset, mode, ratio, conflict.level, size
                ));
                return ResolvedDecision {
                    action: Action::from_direction(m.direction),
                    mode,
                    size_multiplier: size,
                    reasons,
                    penalties: Vec::new(),
                };
            }
            blocked.push((
                BlockingPredicate::ZeroSize,
                format!("conflict {} leaves no size", conflict.level),
            ));
        }

        for (predicate, detail) in &blocked {
            reasons.push(format!("blocked {}: {}", predicate, detail));
        }
        ResolvedDecision {
            action: Action::Avoid,
            mode: TradeMode::NoTrade,
            size_multiplier: 0.0,
            reasons,
            penalties: blocked.iter().map(|(p, _)| p.to_string()).collect(),
        }
    }
}

/// Non-zero vote contributions, largest first, ties by horizon
fn contribution_reasons(votes: &[HorizonVote]) -> Vec<String> {
    let total: f64 = votes.iter().map(|v| v.vote_score.abs()).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    let mut contributing: Vec<&HorizonVote> =
        votes.iter().filter(|v| v.vote_score != 0.0).collect();
    contributing.sort_by(|a, b| {
        b.vote_score
            .abs()
            .total_cmp(&a.vote_score.abs())
            .then_with(|| a.horizon.cmp(&b.horizon))
    });
    contributing
        .iter()
        .map(|v| {
            format!(
                "{} {} {} {:+.3} ({:.0}% of vote)",
                v.horizon,
                v.tier,
                v.direction,
                v.vote_score,
                100.0 * v.vote_score.abs() / total
            )
        })
        .collect()
}

fn unit_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

//! Conflict detection across tiers
//!
//! Decision table, evaluated once per evaluation, first match wins:
//!
//! | Condition | Level |
//! |---|---|
//! | STRUCTURE is SPLIT | CRITICAL |
//! | STRUCTURE opposes both TACTICAL and TIMING | HIGH |
//! | TIMING opposes STRUCTURE, TACTICAL agrees with STRUCTURE | MODERATE |
//! | all directional tiers agree (or none is directional) | LOW |
//! | anything else | MODERATE |
//!
//! "Opposes" is strictly BULL vs BEAR. NEUTRAL and SPLIT abstain.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{require_unit, ConfigError};
use crate::types::{ConflictLevel, Direction, HorizonVote, Tier, TierStance};

/// Structural lock threshold on STRUCTURE weight share
pub const DEFAULT_STRUCTURAL_LOCK_THRESHOLD: f64 = 0.55;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictConfig {
    pub structural_lock_threshold: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            structural_lock_threshold: DEFAULT_STRUCTURAL_LOCK_THRESHOLD,
        }
    }
}

impl ConflictConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_unit(
            "conflict.structural_lock_threshold",
            self.structural_lock_threshold,
        )
    }
}

/// Conflict diagnosis for one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub level: ConflictLevel,
    pub dominant_tier: Tier,
    pub structural_lock: bool,
    pub tier_directions: BTreeMap<Tier, TierStance>,
    /// Share of total weight held by each tier
    pub tier_shares: BTreeMap<Tier, f64>,
    pub description: String,
}

impl Default for ConflictResult {
    fn default() -> Self {
        Self {
            level: ConflictLevel::Low,
            dominant_tier: Tier::Structure,
            structural_lock: false,
            tier_directions: Tier::ALL.iter().map(|t| (*t, TierStance::Neutral)).collect(),
            tier_shares: Tier::ALL.iter().map(|t| (*t, 0.0)).collect(),
            description: "no evidence".to_string(),
        }
    }
}

impl ConflictResult {
    pub fn stance(&self, tier: Tier) -> TierStance {
        self.tier_directions
            .get(&tier)
            .copied()
            .unwrap_or(TierStance::Neutral)
    }
}

/// Conflict detector over tier aggregates
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    config: ConflictConfig,
}

impl ConflictDetector {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, votes: &[HorizonVote]) -> ConflictResult {
        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        if votes.is_empty() || total_weight <= 0.0 {
            return ConflictResult::default();
        }

        let mut tier_directions = BTreeMap::new();
        let mut tier_shares = BTreeMap::new();
        for tier in Tier::ALL {
            tier_directions.insert(tier, tier_stance(votes, tier));
            let weight: f64 = votes.iter().filter(|v| v.tier == tier).map(|v| v.weight).sum();
            tier_shares.insert(tier, weight / total_weight);
        }

        // Highest trust wins ties, so scan STRUCTURE first and only replace on strictly larger
        let mut dominant_tier = Tier::Structure;
        for tier in Tier::ALL.iter().rev() {
            if tier_shares[tier] > tier_shares[&dominant_tier] {
                dominant_tier = *tier;
            }
        }

        let structural_lock =
            structural_lock(tier_shares[&Tier::Structure], self.config.structural_lock_threshold);

        let structure = tier_directions[&Tier::Structure];
        let tactical = tier_directions[&Tier::Tactical];
        let timing = tier_directions[&Tier::Timing];
        let (level, why) = classify(structure, tactical, timing);

        let description = format!(
            "{} ({}): STRUCTURE={} TACTICAL={} TIMING={}, dominant={} share={:.2}{}",
            level,
            why,
            structure,
            tactical,
            timing,
            dominant_tier,
            tier_shares[&dominant_tier],
            if structural_lock { ", structural lock" } else { "" }
        );

        ConflictResult {
            level,
            dominant_tier,
            structural_lock,
            tier_directions,
            tier_shares,
            description,
        }
    }
}

/// Structural lock is a pure threshold on STRUCTURE share, independent of level
pub fn structural_lock(structure_share: f64, threshold: f64) -> bool {
    structure_share >= threshold
}

/// Stance of one tier. Vetoed votes abstain. Opposing directional votes
/// split the tier whatever their size; otherwise the summed score decides,
/// so a directional vote that scored zero leaves the tier NEUTRAL.
fn tier_stance(votes: &[HorizonVote], tier: Tier) -> TierStance {
    let mut has_bull = false;
    let mut has_bear = false;
    let mut score = 0.0;
    for v in votes.iter().filter(|v| v.tier == tier && !v.is_vetoed()) {
        match v.direction {
            Direction::Bull => has_bull = true,
            Direction::Bear => has_bear = true,
            Direction::Neutral => {}
        }
        score += v.vote_score;
    }
    if has_bull && has_bear {
        TierStance::Split
    } else if score > 0.0 {
        TierStance::Bull
    } else if score < 0.0 {
        TierStance::Bear
    } else {
        TierStance::Neutral
    }
}

fn classify(
    structure: TierStance,
    tactical: TierStance,
    timing: TierStance,
) -> (ConflictLevel, &'static str) {
    if structure == TierStance::Split {
        return (ConflictLevel::Critical, "structure split");
    }
    if tactical.is_directional() && structure.opposes(tactical) && structure.opposes(timing) {
        return (ConflictLevel::High, "structure opposed by tactical and timing");
    }
    if structure.opposes(timing) && tactical == structure {
        return (ConflictLevel::Moderate, "timing against structure");
    }

    let mut directional = [structure, tactical, timing]
        .into_iter()
        .filter(|s| s.is_directional());
    let aligned = match directional.next() {
        Some(first) => directional.all(|s| s == first),
        None => true,
    };
    if aligned {
        (ConflictLevel::Low, "aligned")
    } else {
        (ConflictLevel::Moderate, "mixed directions")
    }
}

//! Core types used throughout the verdict engine
//!
//! Defines the closed enumerations (tiers, directions, grades, actions) and the
//! evidence/vote value types that flow between the consensus and invariant passes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Horizon bucket. Declaration order is the trust order (lowest first),
/// so `Ord` ranks STRUCTURE highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Timing,
    Tactical,
    Structure,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Timing, Tier::Tactical, Tier::Structure];

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "TIMING" => Some(Tier::Timing),
            "TACTICAL" => Some(Tier::Tactical),
            "STRUCTURE" => Some(Tier::Structure),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Timing => write!(f, "TIMING"),
            Tier::Tactical => write!(f, "TACTICAL"),
            Tier::Structure => write!(f, "STRUCTURE"),
        }
    }
}

/// Vote direction, derived upstream from evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Bull,
    Bear,
    Neutral,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Neutral
    }
}

impl Direction {
    /// +1 for BULL, -1 for BEAR, 0 for NEUTRAL
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Bull => 1.0,
            Direction::Bear => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    /// Direction of a signed score with a symmetric dead-band
    pub fn from_score(score: f64, epsilon: f64) -> Self {
        if score > epsilon {
            Direction::Bull
        } else if score < -epsilon {
            Direction::Bear
        } else {
            Direction::Neutral
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }

    /// True only for BULL vs BEAR. NEUTRAL never opposes anything.
    pub fn opposes(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Bull, Direction::Bear) | (Direction::Bear, Direction::Bull)
        )
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bull => write!(f, "BULL"),
            Direction::Bear => write!(f, "BEAR"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Aggregate stance of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierStance {
    Bull,
    Bear,
    Neutral,
    /// Tier holds both a BULL and a BEAR vote
    Split,
}

impl TierStance {
    /// Directional view of the stance; SPLIT has none
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TierStance::Bull => Some(Direction::Bull),
            TierStance::Bear => Some(Direction::Bear),
            TierStance::Neutral => Some(Direction::Neutral),
            TierStance::Split => None,
        }
    }

    pub fn is_directional(&self) -> bool {
        matches!(self, TierStance::Bull | TierStance::Bear)
    }

    /// Strictly opposite directional stances
    pub fn opposes(&self, other: TierStance) -> bool {
        matches!(
            (self, other),
            (TierStance::Bull, TierStance::Bear) | (TierStance::Bear, TierStance::Bull)
        )
    }
}

impl From<Direction> for TierStance {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Bull => TierStance::Bull,
            Direction::Bear => TierStance::Bear,
            Direction::Neutral => TierStance::Neutral,
        }
    }
}

impl fmt::Display for TierStance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierStance::Bull => write!(f, "BULL"),
            TierStance::Bear => write!(f, "BEAR"),
            TierStance::Neutral => write!(f, "NEUTRAL"),
            TierStance::Split => write!(f, "SPLIT"),
        }
    }
}

/// Divergence quality grade attached to evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DivergenceGrade {
    A,
    B,
    C,
    D,
    F,
}

impl Default for DivergenceGrade {
    fn default() -> Self {
        DivergenceGrade::B
    }
}

impl DivergenceGrade {
    /// Vote multiplier for this grade
    pub fn penalty(&self) -> f64 {
        match self {
            DivergenceGrade::A => 1.05,
            DivergenceGrade::B => 1.00,
            DivergenceGrade::C => 0.95,
            DivergenceGrade::D => 0.85,
            DivergenceGrade::F => 0.70,
        }
    }

    /// Evidence quality in [0, 1] used for reliability scoring
    pub fn quality(&self) -> f64 {
        match self {
            DivergenceGrade::A => 1.0,
            DivergenceGrade::B => 0.85,
            DivergenceGrade::C => 0.70,
            DivergenceGrade::D => 0.50,
            DivergenceGrade::F => 0.25,
        }
    }
}

impl fmt::Display for DivergenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceGrade::A => write!(f, "A"),
            DivergenceGrade::B => write!(f, "B"),
            DivergenceGrade::C => write!(f, "C"),
            DivergenceGrade::D => write!(f, "D"),
            DivergenceGrade::F => write!(f, "F"),
        }
    }
}

/// Conflict severity. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl Default for ConflictLevel {
    fn default() -> Self {
        ConflictLevel::Low
    }
}

impl ConflictLevel {
    /// Fraction of size removed at this level
    pub fn size_penalty(&self) -> f64 {
        match self {
            ConflictLevel::Low => 0.0,
            ConflictLevel::Moderate => 0.25,
            ConflictLevel::High => 0.5,
            ConflictLevel::Critical => 1.0,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Some(ConflictLevel::Low),
            "MODERATE" => Some(ConflictLevel::Moderate),
            "HIGH" => Some(ConflictLevel::High),
            "CRITICAL" => Some(ConflictLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictLevel::Low => write!(f, "LOW"),
            ConflictLevel::Moderate => write!(f, "MODERATE"),
            ConflictLevel::High => write!(f, "HIGH"),
            ConflictLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Final action. LONG/SHORT/HOLD are accepted as aliases on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    #[serde(alias = "LONG")]
    Buy,
    #[serde(alias = "SHORT")]
    Sell,
    #[serde(alias = "HOLD")]
    Avoid,
}

impl Default for Action {
    fn default() -> Self {
        Action::Avoid
    }
}

impl Action {
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Bull => Action::Buy,
            Direction::Bear => Action::Sell,
            Direction::Neutral => Action::Avoid,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Some(Action::Buy),
            "SELL" | "SHORT" => Some(Action::Sell),
            "AVOID" | "HOLD" => Some(Action::Avoid),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Avoid => write!(f, "AVOID"),
        }
    }
}

/// Trade mode, ordered by exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    NoTrade,
    Micro,
    Partial,
    Full,
}

impl Default for TradeMode {
    fn default() -> Self {
        TradeMode::NoTrade
    }
}

impl TradeMode {
    /// Upper bound on the size multiplier for this mode
    pub fn size_cap(&self) -> f64 {
        match self {
            TradeMode::NoTrade => 0.0,
            TradeMode::Micro => 0.25,
            TradeMode::Partial => 0.5,
            TradeMode::Full => 1.0,
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeMode::NoTrade => write!(f, "NO_TRADE"),
            TradeMode::Micro => write!(f, "MICRO"),
            TradeMode::Partial => write!(f, "PARTIAL"),
            TradeMode::Full => write!(f, "FULL"),
        }
    }
}

/// Verdict strength. `Ord` ranks STRONG highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

impl Default for Strength {
    fn default() -> Self {
        Strength::Weak
    }
}

impl Strength {
    pub fn from_mode(mode: TradeMode) -> Self {
        match mode {
            TradeMode::Full => Strength::Strong,
            TradeMode::Partial => Strength::Moderate,
            TradeMode::Micro | TradeMode::NoTrade => Strength::Weak,
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strength::Weak => write!(f, "WEAK"),
            Strength::Moderate => write!(f, "MODERATE"),
            Strength::Strong => write!(f, "STRONG"),
        }
    }
}

/// Macro risk level. Ordered from calmest to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Medium
    }
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Extreme,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            "EXTREME" => Some(RiskLevel::Extreme),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Per-horizon evidence produced by the statistics collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonEvidence {
    /// Horizon identifier (e.g. "7d", "180d")
    pub horizon: String,
    /// Horizon bucket
    pub tier: Tier,
    /// Direction derived upstream
    pub direction: Direction,
    /// Already-discounted confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Divergence quality grade
    #[serde(default)]
    pub divergence_grade: DivergenceGrade,
    /// Any blocker vetoes this evidence entirely
    #[serde(default)]
    pub blockers: BTreeSet<String>,
}

impl HorizonEvidence {
    pub fn new(
        horizon: impl Into<String>,
        tier: Tier,
        direction: Direction,
        confidence: f64,
        divergence_grade: DivergenceGrade,
    ) -> Self {
        Self {
            horizon: horizon.into(),
            tier,
            direction,
            confidence,
            divergence_grade,
            blockers: BTreeSet::new(),
        }
    }

    /// Add a blocker (vetoes this evidence)
    pub fn with_blocker(mut self, blocker: impl Into<String>) -> Self {
        self.blockers.insert(blocker.into());
        self
    }

    pub fn is_vetoed(&self) -> bool {
        !self.blockers.is_empty()
    }
}

/// Evidence plus its normalized weight and signed vote score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonVote {
    pub horizon: String,
    pub tier: Tier,
    pub direction: Direction,
    /// Clamped confidence actually used for the vote
    pub confidence: f64,
    pub divergence_grade: DivergenceGrade,
    pub blockers: BTreeSet<String>,
    /// Normalized weight (0.0 - 1.0)
    pub weight: f64,
    /// sign(direction) * confidence * weight * divergence penalty * blocker penalty
    pub vote_score: f64,
}

impl HorizonVote {
    pub fn is_vetoed(&self) -> bool {
        !self.blockers.is_empty()
    }
}

/// What the ML classifier would like the verdict to be. Read, never trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MlOpinion {
    #[serde(default)]
    pub wants_action: Option<Action>,
    #[serde(default)]
    pub wants_confidence: Option<f64>,
}

//! Horizon voting

use tracing::warn;

use crate::types::{HorizonEvidence, HorizonVote};

/// Clamp a confidence into [0, 1]. NaN becomes 0.
pub fn sanitize_confidence(horizon: &str, confidence: f64) -> f64 {
    if confidence.is_nan() {
        warn!("Evidence {} has NaN confidence, treating as 0", horizon);
        return 0.0;
    }
    if !(0.0..=1.0).contains(&confidence) {
        warn!(
            "Evidence {} confidence {:.4} out of range, clamping",
            horizon, confidence
        );
    }
    confidence.clamp(0.0, 1.0)
}

/// Convert one evidence item and its weight into a signed vote.
pub fn vote(evidence: &HorizonEvidence, weight: f64) -> HorizonVote {
    let confidence = sanitize_confidence(&evidence.horizon, evidence.confidence);
    let weight = if weight.is_finite() {
        weight.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let blocker_penalty = if evidence.is_vetoed() { 0.0 } else { 1.0 };

    let vote_score = evidence.direction.sign()
        * confidence
        * weight
        * evidence.divergence_grade.penalty()
        * blocker_penalty;

    HorizonVote {
        horizon: evidence.horizon.clone(),
        tier: evidence.tier,
        direction: evidence.direction,
        confidence,
        divergence_grade: evidence.divergence_grade,
        blockers: evidence.blockers.clone(),
        weight,
        vote_score,
    }
}

/// Vote every evidence item with its index-aligned weight
pub fn cast_votes(evidence: &[HorizonEvidence], weights: &[f64]) -> Vec<HorizonVote> {
    evidence
        .iter()
        .zip(weights.iter().copied().chain(std::iter::repeat(0.0)))
        .map(|(ev, w)| vote(ev, w))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DivergenceGrade, Direction, Tier};

    #[test]
    fn test_vote_formula() {
        let ev = HorizonEvidence::new("180d", Tier::Structure, Direction::Bear, 0.7, DivergenceGrade::A);
        let v = vote(&ev, 0.5);
        assert!((v.vote_score - (-1.0 * 0.7 * 0.5 * 1.05)).abs() < 1e-12);
    }

    #[test]
    fn test_grade_penalties_scale_vote() {
        let mut ev = HorizonEvidence::new("7d", Tier::Timing, Direction::Bull, 1.0, DivergenceGrade::F);
        assert!((vote(&ev, 1.0).vote_score - 0.70).abs() < 1e-12);
        ev.divergence_grade = DivergenceGrade::D;
        assert!((vote(&ev, 1.0).vote_score - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_blocker_vetoes_vote() {
        let ev = HorizonEvidence::new("7d", Tier::Timing, Direction::Bull, 0.9, DivergenceGrade::A)
            .with_blocker("low_sample");
        assert_eq!(vote(&ev, 0.4).vote_score, 0.0);
    }

    #[test]
    fn test_neutral_scores_zero() {
        let ev = HorizonEvidence::new("30d", Tier::Tactical, Direction::Neutral, 0.9, DivergenceGrade::B);
        assert_eq!(vote(&ev, 1.0).vote_score, 0.0);
    }

    #[test]
    fn test_out_of_range_confidence_is_clamped() {
        let ev = HorizonEvidence::new("7d", Tier::Timing, Direction::Bull, 1.8, DivergenceGrade::B);
        let v = vote(&ev, 1.0);
        assert_eq!(v.confidence, 1.0);
        assert!((v.vote_score - 1.0).abs() < 1e-12);

        let ev = HorizonEvidence::new("7d", Tier::Timing, Direction::Bull, f64::NAN, DivergenceGrade::B);
        assert_eq!(vote(&ev, 1.0).vote_score, 0.0);
    }

    #[test]
    fn test_missing_weights_default_to_zero() {
        let evidence = vec![
            HorizonEvidence::new("7d", Tier::Timing, Direction::Bull, 0.5, DivergenceGrade::B),
            HorizonEvidence::new("30d", Tier::Tactical, Direction::Bull, 0.5, DivergenceGrade::B),
        ];
        let votes = cast_votes(&evidence, &[1.0]);
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[1].weight, 0.0);
    }
}

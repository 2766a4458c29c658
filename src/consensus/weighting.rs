//! Tier weighting
//!
//! Turns per-horizon evidence into normalized weights. Each tier gets a base
//! share of the vote, split evenly among the non-vetoed horizons present in it.
//! Absent tiers drop out and their share is renormalized across the rest.
//! Volatility shocks and bear drawdowns move weight from TIMING to STRUCTURE.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{require_unit, ConfigError};
use crate::types::{HorizonEvidence, Tier};

/// Base tier weights and defensive shifts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightingConfig {
    pub structure: f64,
    pub tactical: f64,
    pub timing: f64,
    /// Points moved TIMING → STRUCTURE on a volatility shock
    pub vol_shock_shift: f64,
    /// Points moved TIMING → STRUCTURE during a bear drawdown
    pub bear_drawdown_shift: f64,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            structure: 0.50,
            tactical: 0.30,
            timing: 0.20,
            vol_shock_shift: 0.10,
            bear_drawdown_shift: 0.05,
        }
    }
}

impl WeightingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("structure", self.structure),
            ("tactical", self.tactical),
            ("timing", self.timing),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::InvalidTierWeights(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, w
                )));
            }
        }
        let sum = self.structure + self.tactical + self.timing;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidTierWeights(format!(
                "tier weights must sum to 1.0, got {:.6}",
                sum
            )));
        }
        require_unit("weighting.vol_shock_shift", self.vol_shock_shift)?;
        require_unit("weighting.bear_drawdown_shift", self.bear_drawdown_shift)?;
        Ok(())
    }

    /// Base tier weights after applying the modifiers
    pub fn shifted(&self, modifiers: WeightModifiers) -> BTreeMap<Tier, f64> {
        let mut shift = 0.0;
        if modifiers.vol_shock {
            shift += self.vol_shock_shift;
        }
        if modifiers.bear_drawdown {
            shift += self.bear_drawdown_shift;
        }
        // TIMING can't go negative
        let moved = shift.min(self.timing);

        let mut base = BTreeMap::new();
        base.insert(Tier::Timing, self.timing - moved);
        base.insert(Tier::Tactical, self.tactical);
        base.insert(Tier::Structure, self.structure + moved);
        base
    }
}

/// Market-condition modifiers for one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightModifiers {
    #[serde(default)]
    pub vol_shock: bool,
    #[serde(default)]
    pub bear_drawdown: bool,
}

/// Compute one weight per evidence item, aligned by index.
///
/// Vetoed evidence gets 0. Non-vetoed weights sum to 1 whenever at least one
/// item is not vetoed.
pub fn compute_weights(
    evidence: &[HorizonEvidence],
    modifiers: WeightModifiers,
    config: &WeightingConfig,
) -> Vec<f64> {
    let mut counts: BTreeMap<Tier, usize> = BTreeMap::new();
    for ev in evidence.iter().filter(|e| !e.is_vetoed()) {
        *counts.entry(ev.tier).or_insert(0) += 1;
    }
    if counts.is_empty() {
        return vec![0.0; evidence.len()];
    }

    let base = config.shifted(modifiers);
    let present_total: f64 = counts.keys().map(|t| base[t]).sum();

    // Every present tier configured at zero: fall back to an even split
    let tier_share = |tier: Tier| -> f64 {
        if present_total > 0.0 {
            base[&tier] / present_total
        } else {
            1.0 / counts.len() as f64
        }
    };

    evidence
        .iter()
        .map(|ev| {
            if ev.is_vetoed() {
                return 0.0;
            }
            let n = counts[&ev.tier] as f64;
            tier_share(ev.tier) / n
        })
        .collect()
}

/// Same weights keyed by horizon identifier
pub fn weights_by_horizon(evidence: &[HorizonEvidence], weights: &[f64]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (ev, w) in evidence.iter().zip(weights) {
        *out.entry(ev.horizon.clone()).or_insert(0.0) += *w;
    }
    out
}

//! Downgrade audit trail
//!
//! In-process, bounded record of every downgrade the invariant engine applies,
//! plus rolling counters. This is not the system of record: a persistence
//! collaborator drains or exports it (see `export_csv`).
//!
//! The sink is injected into the engine rather than living in a global. All
//! mutation happens under one mutex; readers get snapshot copies so formatting
//! never holds the lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{Action, Strength};

/// Default ring capacity
pub const DEFAULT_AUDIT_CAPACITY: usize = 500;

/// Category of the invariant that caused a downgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DowngradeTrigger {
    Regime,
    Stress,
    Conflict,
    MlWarning,
    WhaleRisk,
    Panic,
    ConfidenceCap,
}

impl fmt::Display for DowngradeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DowngradeTrigger::Regime => "REGIME",
            DowngradeTrigger::Stress => "STRESS",
            DowngradeTrigger::Conflict => "CONFLICT",
            DowngradeTrigger::MlWarning => "ML_WARNING",
            DowngradeTrigger::WhaleRisk => "WHALE_RISK",
            DowngradeTrigger::Panic => "PANIC",
            DowngradeTrigger::ConfidenceCap => "CONFIDENCE_CAP",
        };
        write!(f, "{}", name)
    }
}

/// One applied downgrade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowngradeLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub original_action: Action,
    pub original_strength: Strength,
    pub original_confidence: f64,
    pub final_action: Action,
    pub final_strength: Strength,
    pub final_confidence: f64,
    pub reason: String,
    pub trigger: DowngradeTrigger,
    /// Invariant context at the time of the downgrade
    pub context_snapshot: serde_json::Value,
}

/// Per-evaluation summary fed to the metrics counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub passed: bool,
    pub blocked: bool,
    pub violations: usize,
}

/// Where the invariant engine reports downgrades and evaluations
#[cfg_attr(test, mockall::automock)]
pub trait DowngradeSink: Send + Sync {
    fn record_downgrade(&self, entry: DowngradeLogEntry);

    fn record_evaluation(&self, summary: EvaluationSummary);
}

/// Rolling counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditMetrics {
    pub evaluations: u64,
    pub passed: u64,
    pub blocked: u64,
    pub violations: u64,
    pub downgrades: u64,
    pub downgrades_by_trigger: BTreeMap<DowngradeTrigger, u64>,
    /// Sum of confidence removed across all downgrades
    pub confidence_removed: f64,
    /// Entries dropped from the ring to respect capacity
    pub evicted: u64,
}

impl AuditMetrics {
    pub fn pass_rate(&self) -> f64 {
        if self.evaluations == 0 {
            1.0
        } else {
            self.passed as f64 / self.evaluations as f64
        }
    }

    pub fn mean_confidence_drop(&self) -> f64 {
        if self.downgrades == 0 {
            0.0
        } else {
            self.confidence_removed / self.downgrades as f64
        }
    }
}

#[derive(Debug, Default)]
struct AuditState {
    entries: VecDeque<DowngradeLogEntry>,
    metrics: AuditMetrics,
}

/// Bounded ring buffer of downgrades plus metrics
#[derive(Debug)]
pub struct DowngradeAudit {
    capacity: usize,
    state: Mutex<AuditState>,
}

impl Default for DowngradeAudit {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl DowngradeAudit {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(AuditState {
                entries: VecDeque::with_capacity(capacity),
                metrics: AuditMetrics::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every update leaves the ring and counters consistent, so a lock
    /// poisoned by a panicking writer is recovered instead of dropping data.
    fn lock(&self) -> MutexGuard<'_, AuditState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Audit log lock poisoned, recovering");
            self.state.clear_poison();
            PoisonError::into_inner(poisoned)
        })
    }

    /// Copy of the current log, oldest first
    pub fn entries(&self) -> Vec<DowngradeLogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Most recent `n` entries, newest first
    pub fn recent(&self, n: usize) -> Vec<DowngradeLogEntry> {
        self.lock().entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the counters
    pub fn metrics(&self) -> AuditMetrics {
        self.lock().metrics.clone()
    }

    /// Remove and return every entry (for a persistence collaborator)
    pub fn drain(&self) -> Vec<DowngradeLogEntry> {
        self.lock().entries.drain(..).collect()
    }

    /// Write the current log as CSV. Returns the number of rows written.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let entries = self.entries();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        for entry in &entries {
            writer
                .serialize(DowngradeCsvRow::from(entry))
                .context("Failed to write downgrade row")?;
        }
        writer.flush().context("Failed to flush downgrade CSV")?;

        info!("Exported {} downgrades to {}", entries.len(), path.display());
        Ok(entries.len())
    }
}

impl DowngradeSink for DowngradeAudit {
    fn record_downgrade(&self, entry: DowngradeLogEntry) {
        let mut state = self.lock();
        state.metrics.downgrades += 1;
        *state
            .metrics
            .downgrades_by_trigger
            .entry(entry.trigger)
            .or_insert(0) += 1;
        state.metrics.confidence_removed +=
            (entry.original_confidence - entry.final_confidence).max(0.0);

        while state.entries.len() >= self.capacity {
            state.entries.pop_front();
            state.metrics.evicted += 1;
        }
        state.entries.push_back(entry);
    }

    fn record_evaluation(&self, summary: EvaluationSummary) {
        let mut state = self.lock();
        state.metrics.evaluations += 1;
        if summary.passed {
            state.metrics.passed += 1;
        }
        if summary.blocked {
            state.metrics.blocked += 1;
        }
        state.metrics.violations += summary.violations as u64;
    }
}

/// Flat CSV representation of an entry
#[derive(Debug, Serialize)]
struct DowngradeCsvRow {
    id: String,
    timestamp: String,
    trigger: String,
    original_action: String,
    original_strength: String,
    original_confidence: f64,
    final_action: String,
    final_strength: String,
    final_confidence: f64,
    reason: String,
    context: String,
}

impl From<&DowngradeLogEntry> for DowngradeCsvRow {
    fn from(e: &DowngradeLogEntry) -> Self {
        Self {
            id: e.id.to_string(),
            timestamp: e.timestamp.to_rfc3339(),
            trigger: e.trigger.to_string(),
            original_action: e.original_action.to_string(),
            original_strength: e.original_strength.to_string(),
            original_confidence: e.original_confidence,
            final_action: e.final_action.to_string(),
            final_strength: e.final_strength.to_string(),
            final_confidence: e.final_confidence,
            reason: e.reason.clone(),
            context: e.context_snapshot.to_string(),
        }
    }
}

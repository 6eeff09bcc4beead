//! Append-only record of point-in-time fitness evaluations.
//!
//! "Latest" and "best" are derived on demand from insertion order; nothing
//! aggregate is stored alongside the records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::model::Vehicle;

pub const DEFAULT_DISPLAY_WINDOW: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub vehicle: Vehicle,
    pub score: f64,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl EvaluationRecord {
    pub fn new(vehicle: Vehicle, score: f64) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            vehicle,
            score,
            created_at_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationLedger {
    records: Vec<EvaluationRecord>,
}

/// First record with the highest score; NaN scores never win.
fn max_by_score(records: &[EvaluationRecord]) -> Option<&EvaluationRecord> {
    records
        .iter()
        .filter(|r| !r.score.is_nan())
        .fold(None, |best: Option<&EvaluationRecord>, r| match best {
            Some(b) if r.score <= b.score => Some(b),
            _ => Some(r),
        })
}

impl EvaluationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: EvaluationRecord) {
        self.records.push(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&EvaluationRecord> {
        self.records.last()
    }

    pub fn best(&self) -> Option<&EvaluationRecord> {
        max_by_score(&self.records)
    }

    /// Best over every record except the most recent one.
    pub fn best_before_latest(&self) -> Option<&EvaluationRecord> {
        match self.records.split_last() {
            Some((_, earlier)) => max_by_score(earlier),
            None => None,
        }
    }

    /// True when the latest record beats everything before it. The first
    /// record of an empty history counts as an improvement.
    pub fn latest_is_improvement(&self) -> bool {
        match (self.latest(), self.best_before_latest()) {
            (Some(latest), Some(prev)) => latest.score > prev.score,
            (Some(latest), None) => !latest.score.is_nan(),
            (None, _) => false,
        }
    }

    /// The newest `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[EvaluationRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }
}

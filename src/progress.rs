//! In-memory progress model, grounded on `parallel_progress.py`. Mutated only by the
//! coordinator at well-defined points; the pretty-printers here never mutate it.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Transient state of one in-flight worker. Closed set per the sum-type discipline
/// design note; `Reviewing` and `Integrating` are a worker's live activity, deliberately
/// distinct from the scheduler's `integration` tier — the two vocabularies are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Coding,
    Reviewing,
    Qa,
    Integrating,
    Done,
    Failed,
    Conflict,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Conflict)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_index: usize,
    pub issue_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: WorkerStatus,
}

impl WorkerRecord {
    pub fn new(worker_index: usize, issue_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            worker_index,
            issue_id: issue_id.into(),
            start_time,
            end_time: None,
            status: WorkerStatus::Starting,
        }
    }

    pub fn set_status(&mut self, status: WorkerStatus, now: DateTime<Utc>) {
        self.status = status;
        if status.is_terminal() {
            self.end_time = Some(now);
        }
    }
}

/// Per-tier aggregate: completion, failure, and the live worker table for the tier
/// currently executing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierProgress {
    pub tier: u32,
    pub description: String,
    pub completed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub workers: IndexMap<usize, WorkerRecord>,
}

impl TierProgress {
    pub fn new(tier: u32, description: impl Into<String>) -> Self {
        Self {
            tier,
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Top-level aggregate the coordinator maintains across the entire run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallProgress {
    pub total_issues: usize,
    pub completed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub requeued: BTreeSet<String>,
    pub current_tier: Option<TierProgress>,
    pub started_at: DateTime<Utc>,
    pub tiers_completed: usize,
}

impl OverallProgress {
    pub fn new(total_issues: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total_issues,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            requeued: BTreeSet::new(),
            current_tier: None,
            started_at,
            tiers_completed: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.total_issues
            .saturating_sub(self.completed.len() + self.failed.len())
    }
}

/// One-line summary suitable for a log line or terminal status bar. Never mutates
/// `progress`.
pub fn format_summary(progress: &OverallProgress) -> String {
    format!(
        "{}/{} done, {} failed, {} re-queued, {} remaining (tier {})",
        progress.completed.len(),
        progress.total_issues,
        progress.failed.len(),
        progress.requeued.len(),
        progress.remaining(),
        progress
            .current_tier
            .as_ref()
            .map(|t| t.tier.to_string())
            .unwrap_or_else(|| "-".to_string()),
    )
}

/// Multi-line human rendering of the currently active tier's worker table.
pub fn format_tier_detail(tier: &TierProgress) -> String {
    let mut out = format!(
        "tier {} ({}): {} done, {} failed\n",
        tier.tier,
        tier.description,
        tier.completed.len(),
        tier.failed.len()
    );
    for record in tier.workers.values() {
        out.push_str(&format!(
            "  w{}: {} [{:?}]\n",
            record.worker_index, record.issue_id, record.status
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn worker_record_sets_end_time_only_on_terminal_status() {
        let mut record = WorkerRecord::new(0, "T-1", now());
        record.set_status(WorkerStatus::Coding, now());
        assert!(record.end_time.is_none());

        record.set_status(WorkerStatus::Done, now());
        assert!(record.end_time.is_some());
    }

    #[test]
    fn overall_progress_remaining_excludes_completed_and_failed() {
        let mut progress = OverallProgress::new(5, now());
        progress.completed.insert("T-1".to_string());
        progress.failed.insert("T-2".to_string());
        assert_eq!(progress.remaining(), 3);
    }

    #[test]
    fn format_summary_reflects_current_tier() {
        let mut progress = OverallProgress::new(3, now());
        progress.current_tier = Some(TierProgress::new(2, "backend"));
        let summary = format_summary(&progress);
        assert!(summary.contains("tier 2"));
        assert!(summary.contains("0/3"));
    }

    #[test]
    fn worker_status_and_integration_tier_are_distinct_vocabularies() {
        // WorkerStatus's "Integrating" variant and the scheduler's tier-7 description
        // string "integration" live in separate enums entirely.
        let status = WorkerStatus::Integrating;
        assert_ne!(format!("{status:?}").to_lowercase(), "integration");
    }
}

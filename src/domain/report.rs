//! Dispatch report aggregation.
//!
//! A [`DispatchReport`] is assembled incrementally through a [`ReportBuilder`]
//! owned by the dispatcher and becomes read-only once finalized.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{RowSkip, RunId, SendOutcome};

/// Terminal status of a run that reached the sending phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every validated recipient was attempted.
    Completed,
    /// The run was cancelled at a recipient boundary.
    Cancelled,
}

/// Aggregated outcome of one dispatch run.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    run_id: RunId,
    status: RunStatus,
    total_recipients: usize,
    outcomes: Vec<SendOutcome>,
    skipped_rows: Vec<RowSkip>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl DispatchReport {
    /// Identifier of the run that produced this report.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Whether the run completed or was cancelled.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Number of validated recipients the run intended to attempt.
    pub fn total_recipients(&self) -> usize {
        self.total_recipients
    }

    /// Outcomes in recipient order.
    pub fn outcomes(&self) -> &[SendOutcome] {
        &self.outcomes
    }

    /// Rows dropped by the loader before sending began.
    pub fn skipped_rows(&self) -> &[RowSkip] {
        &self.skipped_rows
    }

    /// Number of accepted messages.
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of rejected messages.
    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// Number of recipients never attempted because the run was cancelled.
    pub fn unattempted_count(&self) -> usize {
        self.total_recipients - self.outcomes.len()
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the report was finalized.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Returns true if the run completed and every attempt succeeded.
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed && self.failure_count() == 0
    }

    /// Human-readable digest of failed recipients.
    ///
    /// Lists at most `limit` failures as `email: detail`, followed by a
    /// `... and N more` line when some were left out. Returns `None` when
    /// nothing failed.
    pub fn failure_summary(&self, limit: usize) -> Option<String> {
        let failures: Vec<&SendOutcome> =
            self.outcomes.iter().filter(|o| !o.is_success()).collect();
        if failures.is_empty() {
            return None;
        }

        let mut summary = format!("Failed to send to {} recipients:", failures.len());
        for outcome in failures.iter().take(limit) {
            summary.push('\n');
            summary.push_str(outcome.recipient.email());
            summary.push_str(": ");
            summary.push_str(outcome.error_detail.as_deref().unwrap_or("unknown error"));
        }
        if failures.len() > limit {
            summary.push_str(&format!("\n... and {} more", failures.len() - limit));
        }
        Some(summary)
    }
}

/// Mutable accumulator for a [`DispatchReport`].
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: RunId,
    total_recipients: usize,
    outcomes: Vec<SendOutcome>,
    skipped_rows: Vec<RowSkip>,
    started_at: DateTime<Utc>,
}

impl ReportBuilder {
    /// Starts an empty report for a run over `total_recipients` recipients.
    pub fn new(run_id: RunId, total_recipients: usize, skipped_rows: Vec<RowSkip>) -> Self {
        Self {
            run_id,
            total_recipients,
            outcomes: Vec::with_capacity(total_recipients),
            skipped_rows,
            started_at: Utc::now(),
        }
    }

    /// Appends the outcome of the next attempted recipient.
    pub fn record(&mut self, outcome: SendOutcome) {
        debug_assert!(self.outcomes.len() < self.total_recipients);
        self.outcomes.push(outcome);
    }

    /// Number of outcomes recorded so far.
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// Freezes the report with its terminal status.
    pub fn finalize(self, status: RunStatus) -> DispatchReport {
        DispatchReport {
            run_id: self.run_id,
            status,
            total_recipients: self.total_recipients,
            outcomes: self.outcomes,
            skipped_rows: self.skipped_rows,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

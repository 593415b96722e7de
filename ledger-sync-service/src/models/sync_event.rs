//! Pass bookkeeping: per-record outcomes and the append-only sync event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// States a pass moves through. `Done` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PassState {
    Fetching,
    Normalizing,
    Persisting,
    Classifying,
    Resolving,
    Guarding,
    Creating,
    Logging,
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created { remote_id: String },
    AlreadyExists { remote_id: String },
    /// No downstream authorization; the record was only persisted locally.
    Skipped,
    Failed(RecordFailure),
}

/// A record-level failure, kept with its full downstream payload for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub source_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Every record either produced a document or already had one.
    Success,
    /// Some records succeeded and some failed or were skipped.
    Partial,
    /// Documents were attempted and none succeeded.
    Failed,
    /// No authorization; nothing was attempted downstream.
    Skipped,
    Cancelled,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record written exactly once per pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub company_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub records_seen: u32,
    pub records_inserted: u32,
    pub documents_created: u32,
    pub documents_existing: u32,
    pub records_skipped: u32,
    pub records_failed: u32,
    pub outcome: SyncOutcome,
    pub failures: Vec<RecordFailure>,
}

/// Running counters for a pass, folded into a [`SyncEvent`] at the end.
#[derive(Debug, Default)]
pub(crate) struct PassTally {
    pub records_seen: u32,
    pub records_inserted: u32,
    pub documents_created: u32,
    pub documents_existing: u32,
    pub records_skipped: u32,
    pub failures: Vec<RecordFailure>,
    /// Set once the pass knows it has no usable downstream authorization.
    pub authorization_missing: bool,
}

impl PassTally {
    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created { .. } => self.documents_created += 1,
            RecordOutcome::AlreadyExists { .. } => self.documents_existing += 1,
            RecordOutcome::Skipped => self.records_skipped += 1,
            RecordOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    fn outcome(&self, cancelled: bool) -> SyncOutcome {
        let succeeded = self.documents_created + self.documents_existing;
        let failed = u32::try_from(self.failures.len()).unwrap_or(u32::MAX);
        if cancelled {
            SyncOutcome::Cancelled
        } else if succeeded == 0
            && failed == 0
            && (self.records_skipped > 0 || self.authorization_missing)
        {
            SyncOutcome::Skipped
        } else if failed == 0 && self.records_skipped == 0 {
            SyncOutcome::Success
        } else if succeeded == 0 && self.records_skipped == 0 {
            SyncOutcome::Failed
        } else {
            SyncOutcome::Partial
        }
    }

    pub fn finish(
        self,
        company_id: i64,
        started_at: DateTime<Utc>,
        cancelled: bool,
    ) -> SyncEvent {
        let outcome = self.outcome(cancelled);
        SyncEvent {
            company_id,
            started_at,
            completed_at: Utc::now(),
            records_seen: self.records_seen,
            records_inserted: self.records_inserted,
            documents_created: self.documents_created,
            documents_existing: self.documents_existing,
            records_skipped: self.records_skipped,
            records_failed: u32::try_from(self.failures.len()).unwrap_or(u32::MAX),
            outcome,
            failures: self.failures,
        }
    }
}

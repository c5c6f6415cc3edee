//! Durable storage for submissions and evaluation results.
//!
//! The store is the system of record: the queue keeps only in-memory
//! progress, and everything it needs after a restart is re-derived from
//! `load_pending_for_recovery`.
//!
//! - `SqliteStore`: rusqlite-backed store used by the daemon and CLI
//! - `MemoryStore`: in-process store with call counters, for tests and embedding

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};

use crate::domain::{EvaluationStatus, ScoreBreakdown, Submission};
use crate::error::Result;

/// Performance label written when a result is handed to manual review
pub const MANUAL_REVIEW_LABEL: &str = "Pending Manual Review";

/// Performance label for results that have not been scored yet
pub const PENDING_LABEL: &str = "Pending Evaluation";

/// Persistence operations the queue depends on
///
/// Calls are synchronous; a write either commits fully or leaves the row in
/// its previous state.
pub trait DurableStore: Send + Sync {
    /// Save a new submission with status `pending`, returning its result id
    ///
    /// An empty `result_id` is assigned by the store.
    fn persist_submission(&self, submission: &Submission) -> Result<String>;

    /// Record a finished evaluation and mark it `completed`
    fn write_evaluation_result(&self, result_id: &str, breakdown: &ScoreBreakdown) -> Result<bool>;

    /// Mark a submission `failed` for manual review
    fn mark_failed(&self, result_id: &str, error_message: &str) -> Result<bool>;

    /// Whether evaluation is paused for an exam
    fn is_paused(&self, exam_id: &str) -> Result<bool>;

    /// Submissions in `pending` or `processing`, oldest first
    fn load_pending_for_recovery(&self) -> Result<Vec<Submission>>;

    /// Mark a submission `processing` when the worker picks it up
    fn mark_processing(&self, result_id: &str) -> Result<bool>;

    /// Pause or resume evaluation for an exam
    fn set_paused(&self, exam_id: &str, paused: bool) -> Result<()>;

    /// Move a `failed` submission back to `pending`, returning it
    ///
    /// The row is flagged as an admin retry until `take_retry_requests` sees
    /// it. Returns `None` when the submission is unknown or not failed.
    fn reset_failed(&self, result_id: &str) -> Result<Option<Submission>>;

    /// Unfinished submissions flagged by `reset_failed`, oldest first
    ///
    /// Clears every flag, including those on rows that already finished.
    fn take_retry_requests(&self) -> Result<Vec<Submission>>;

    /// Persisted status and scores of one submission
    fn evaluation_status(&self, result_id: &str) -> Result<Option<StoredEvaluation>>;

    /// Count of submissions per persisted status
    fn status_counts(&self) -> Result<StatusCounts>;
}

/// Persisted evaluation state of one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvaluation {
    pub result_id: String,
    pub exam_id: String,
    pub candidate_name: String,
    pub candidate_id: String,
    pub status: EvaluationStatus,
    pub error: Option<String>,
    pub performance_level: String,
    pub total_marks: f64,
    pub obtained_marks: f64,
    pub percentage: f64,
    pub submitted_at: i64,
    pub evaluated_at: Option<i64>,
    pub breakdown: Option<ScoreBreakdown>,
}

impl StoredEvaluation {
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Number of submissions in each persisted status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: EvaluationStatus) {
        match status {
            EvaluationStatus::Pending => self.pending += 1,
            EvaluationStatus::Processing => self.processing += 1,
            EvaluationStatus::Completed => self.completed += 1,
            EvaluationStatus::Failed => self.failed += 1,
            EvaluationStatus::Partial => {}
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

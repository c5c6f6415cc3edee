//! In-memory progress records, one per result id
//!
//! The store keeps the coarse persisted status; this table carries what a
//! candidate polling for their result sees: a finer state, a message, and
//! timestamps for each transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{EvaluationStatus, EvaluationTask, ProgressState};

pub const QUEUED_MESSAGE: &str = "Your exam is queued for evaluation. You can close this page and check back later.";
pub const PAUSED_MESSAGE: &str =
    "Evaluation is paused by admin. Your answers are safe and will be evaluated when resumed.";
pub const PROCESSING_MESSAGE: &str = "Your exam is being evaluated...";
pub const COMPLETED_MESSAGE: &str = "Evaluation complete! You can now view your results.";
pub const FAILED_MESSAGE: &str = "Automatic evaluation could not be completed. Your answers have been saved and will be reviewed manually by our team.";
pub const UNKNOWN_MESSAGE: &str = "No evaluation activity recorded for this result yet.";

pub fn short_retry_message(delay_secs: u64, attempt: u32, max_retries: u32) -> String {
    format!(
        "Evaluation temporarily delayed. Retrying in {} seconds... (Attempt {}/{})",
        delay_secs, attempt, max_retries
    )
}

pub fn long_retry_message(delay_mins: u64, cycle: u32, max_cycles: u32) -> String {
    format!(
        "Evaluation service temporarily unavailable. Will retry in {} minutes (attempt {}/{}). Your answers are safe!",
        delay_mins, cycle, max_cycles
    )
}

pub fn failure_unrecorded_message(delay_secs: u64) -> String {
    format!(
        "Evaluation temporarily delayed. Retrying in {} seconds... Your answers are safe!",
        delay_secs
    )
}

pub fn long_retry_requeued_message(cycle: u32, max_cycles: u32) -> String {
    format!("Re-queued for evaluation (long-term retry {}/{}).", cycle, max_cycles)
}

/// Progress of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub state: ProgressState,
    pub message: String,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub long_retry_count: u32,
    pub max_long_retries: u32,
    pub total_questions: usize,
    pub evaluated_questions: usize,
    pub last_error: Option<String>,
}

impl ProgressRecord {
    /// Fresh record for a task that was just admitted
    pub fn queued(task: &EvaluationTask) -> Self {
        Self {
            state: ProgressState::Pending,
            message: QUEUED_MESSAGE.to_string(),
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            next_retry_at: None,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            long_retry_count: task.long_retry_count,
            max_long_retries: task.max_long_retries,
            total_questions: task.submission.questions.len(),
            evaluated_questions: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> EvaluationStatus {
        self.state.status()
    }

    /// Copy the task's retry counters and last error into the record
    pub fn mirror_counters(&mut self, task: &EvaluationTask) {
        self.retry_count = task.retry_count;
        self.max_retries = task.max_retries;
        self.long_retry_count = task.long_retry_count;
        self.max_long_retries = task.max_long_retries;
        if !task.last_error.is_empty() {
            self.last_error = Some(task.last_error.clone());
        }
    }

    /// When the record reached a terminal state
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ProgressState::Completed => self.completed_at,
            ProgressState::Failed => self.failed_at,
            _ => None,
        }
    }
}

/// Progress records keyed by result id
#[derive(Debug, Default)]
pub struct StatusTable {
    records: HashMap<String, ProgressRecord>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, result_id: &str, record: ProgressRecord) {
        self.records.insert(result_id.to_string(), record);
    }

    pub fn get(&self, result_id: &str) -> Option<&ProgressRecord> {
        self.records.get(result_id)
    }

    pub fn get_mut(&mut self, result_id: &str) -> Option<&mut ProgressRecord> {
        self.records.get_mut(result_id)
    }

    pub fn remove(&mut self, result_id: &str) -> Option<ProgressRecord> {
        self.records.remove(result_id)
    }

    /// Drop terminal records that finished before `cutoff`; returns how many
    pub fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| !matches!(record.finished_at(), Some(finished) if finished < cutoff));
        before - self.records.len()
    }

    /// Number of records per coarse status
    pub fn count(&self, status: EvaluationStatus) -> usize {
        self.records.values().filter(|r| r.status() == status).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

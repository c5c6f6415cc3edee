//! Crash Recovery - rebuilds the queue from the durable store
//!
//! Anything the store still holds as `pending` or `processing` was admitted
//! but never finished: the process stopped while it was queued, being
//! evaluated, or waiting on a retry timer. Each such submission is re-admitted
//! as a fresh task with zeroed retry counters.
//!
//! Rows reset by an admin retry outside this process (the `retry` command)
//! are flagged in the store and re-admitted at the highest priority.

use tracing::{info, warn};

use crate::domain::{HIGHEST_PRIORITY, Submission};
use crate::error::{EvalqError, Result};
use crate::queue::EvaluationQueue;

/// Result of recovering a single submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Submission was put back on the queue
    Requeued { result_id: String },
    /// Submission is already queued, in flight, or scheduled
    Skipped { result_id: String },
}

impl RecoveryAction {
    pub fn is_requeued(&self) -> bool {
        matches!(self, RecoveryAction::Requeued { .. })
    }
}

/// Re-admit every unfinished submission at `priority`, oldest first
pub fn recover_pending(queue: &EvaluationQueue, priority: i32) -> Result<Vec<RecoveryAction>> {
    let submissions = queue.store().load_pending_for_recovery()?;

    let mut actions = Vec::with_capacity(submissions.len());
    for submission in submissions {
        actions.push(recover_one(queue, submission, priority)?);
    }

    let requeued = actions.iter().filter(|a| a.is_requeued()).count();
    if requeued > 0 {
        info!(requeued, skipped = actions.len() - requeued, "Recovered pending evaluations");
    }
    Ok(actions)
}

/// Re-admit submissions reset by an admin retry at the highest priority
pub fn recover_retry_requests(queue: &EvaluationQueue) -> Result<Vec<RecoveryAction>> {
    let actions = queue
        .store()
        .take_retry_requests()?
        .into_iter()
        .map(|submission| recover_one(queue, submission, HIGHEST_PRIORITY))
        .collect::<Result<Vec<_>>>()?;

    let requeued = actions.iter().filter(|a| a.is_requeued()).count();
    if requeued > 0 {
        info!(requeued, "Picked up admin retries");
    }
    Ok(actions)
}

fn recover_one(queue: &EvaluationQueue, submission: Submission, priority: i32) -> Result<RecoveryAction> {
    let result_id = submission.result_id.clone();
    match queue.add_task(submission, priority) {
        Ok(()) => Ok(RecoveryAction::Requeued { result_id }),
        Err(EvalqError::DuplicateTask(_)) => Ok(RecoveryAction::Skipped { result_id }),
        Err(EvalqError::InvalidState(reason)) => {
            warn!(result_id = %result_id, reason = %reason, "Skipping unrecoverable submission");
            Ok(RecoveryAction::Skipped { result_id })
        }
        Err(e) => Err(e),
    }
}

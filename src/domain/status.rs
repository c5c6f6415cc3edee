//! Evaluation lifecycle states
//!
//! `EvaluationStatus` is what the durable store records. `ProgressState` is the
//! finer candidate-facing state kept in memory by the queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EvalqError;

/// Persisted evaluation status of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    /// Waiting in the queue (or waiting for a requeue)
    Pending,
    /// The worker has picked it up
    Processing,
    /// Result written
    Completed,
    /// Automatic evaluation gave up, needs manual review
    Failed,
    /// Reserved, never assigned by the queue
    Partial,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Pending => "pending",
            EvaluationStatus::Processing => "processing",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
            EvaluationStatus::Partial => "partial",
        }
    }

    /// Returns true if no further automatic work will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }

    /// Returns true if recovery should requeue a submission in this state
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EvaluationStatus::Pending | EvaluationStatus::Processing)
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = EvalqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EvaluationStatus::Pending),
            "processing" => Ok(EvaluationStatus::Processing),
            "completed" => Ok(EvaluationStatus::Completed),
            "failed" => Ok(EvaluationStatus::Failed),
            "partial" => Ok(EvaluationStatus::Partial),
            other => Err(EvalqError::InvalidState(format!("unknown evaluation status: {}", other))),
        }
    }
}

/// Candidate-facing progress of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    Pending,
    /// Exam evaluation paused by an administrator
    Paused,
    Processing,
    /// Waiting out a short backoff
    Retrying,
    /// Short retries exhausted, waiting for an escalated attempt
    LongRetryPending,
    Completed,
    Failed,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Pending => "pending",
            ProgressState::Paused => "paused",
            ProgressState::Processing => "processing",
            ProgressState::Retrying => "retrying",
            ProgressState::LongRetryPending => "long_retry_pending",
            ProgressState::Completed => "completed",
            ProgressState::Failed => "failed",
        }
    }

    /// Coarse status this progress state reports as
    pub fn status(&self) -> EvaluationStatus {
        match self {
            ProgressState::Pending
            | ProgressState::Paused
            | ProgressState::Retrying
            | ProgressState::LongRetryPending => EvaluationStatus::Pending,
            ProgressState::Processing => EvaluationStatus::Processing,
            ProgressState::Completed => EvaluationStatus::Completed,
            ProgressState::Failed => EvaluationStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

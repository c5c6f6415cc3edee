//! Domain types for evalq
//!
//! - Question / AnswerValue: read-only question snapshot and submitted answers
//! - Submission / EvaluationTask: durable input and its queued wrapper
//! - EvaluationStatus / ProgressState: lifecycle states
//! - ScoreBreakdown / QuestionResult: evaluation output

pub mod outcome;
pub mod question;
pub mod status;
pub mod task;

pub use outcome::{PerformanceLevel, QuestionResult, ScoreBreakdown};
pub use question::{AnswerValue, DEFAULT_SECTION, Question, QuestionType};
pub use status::{EvaluationStatus, ProgressState};
pub use task::{
    DEFAULT_PRIORITY, EvaluationTask, HIGHEST_PRIORITY, NegativeMarkingConfig, RetryLimits, ScoringMode,
    SectionPenalty, Submission,
};

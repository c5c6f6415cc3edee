//! Submission and evaluation task types
//!
//! A `Submission` is what the durable store keeps: the candidate's answers and
//! the scoring configuration, with no scheduling state. An `EvaluationTask`
//! wraps one submission with the priority and retry counters the queue needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::question::{AnswerValue, Question};

/// Highest scheduling priority (lower dispatches first)
pub const HIGHEST_PRIORITY: i32 = 0;

/// Priority for ordinary submissions
pub const DEFAULT_PRIORITY: i32 = 1;

/// Negative marking settings for one exam section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionPenalty {
    pub enabled: bool,
    #[serde(alias = "mcq_negative_marks")]
    pub penalty_per_wrong: f64,
    pub apply_to_unanswered: bool,
}

impl SectionPenalty {
    /// An enabled penalty for wrong answers only
    pub fn per_wrong(penalty: f64) -> Self {
        Self {
            enabled: true,
            penalty_per_wrong: penalty,
            apply_to_unanswered: false,
        }
    }

    /// Also penalize questions left unanswered
    pub fn including_unanswered(mut self) -> Self {
        self.apply_to_unanswered = true;
        self
    }
}

/// Section key → penalty settings
pub type NegativeMarkingConfig = HashMap<String, SectionPenalty>;

/// How multi-select questions award marks when the selection is not exact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Proportional credit for more hits than misses
    #[default]
    Partial,
    /// Exact match or nothing
    Strict,
}

fn default_true() -> bool {
    true
}

/// Everything the candidate submitted, as persisted before evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Assigned by the durable store when empty
    #[serde(default)]
    pub result_id: String,
    pub session_id: String,
    pub exam_id: String,
    pub candidate_name: String,
    pub candidate_id: String,
    #[serde(default)]
    pub answers: HashMap<String, AnswerValue>,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub negative_marking_config: NegativeMarkingConfig,
    #[serde(default = "default_true")]
    pub show_feedback: bool,
    #[serde(default)]
    pub multi_select_scoring_mode: ScoringMode,
}

impl Submission {
    /// Create a submission with no answers yet
    pub fn new(
        result_id: &str,
        session_id: &str,
        exam_id: &str,
        candidate_name: &str,
        candidate_id: &str,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            result_id: result_id.to_string(),
            session_id: session_id.to_string(),
            exam_id: exam_id.to_string(),
            candidate_name: candidate_name.to_string(),
            candidate_id: candidate_id.to_string(),
            answers: HashMap::new(),
            questions,
            negative_marking_config: NegativeMarkingConfig::new(),
            show_feedback: true,
            multi_select_scoring_mode: ScoringMode::default(),
        }
    }

    pub fn with_answer(mut self, question_id: &str, answer: impl Into<AnswerValue>) -> Self {
        self.answers.insert(question_id.to_string(), answer.into());
        self
    }

    pub fn with_penalty(mut self, section: &str, penalty: SectionPenalty) -> Self {
        self.negative_marking_config.insert(section.to_string(), penalty);
        self
    }

    pub fn with_scoring_mode(mut self, mode: ScoringMode) -> Self {
        self.multi_select_scoring_mode = mode;
        self
    }

    /// Answer for a question, if one was submitted
    pub fn answer_for(&self, question_id: &str) -> Option<&AnswerValue> {
        self.answers.get(question_id)
    }
}

/// Retry ceilings copied onto every task at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub max_retries: u32,
    pub max_long_retries: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_long_retries: 6,
        }
    }
}

/// One pending-or-in-flight evaluation
#[derive(Debug, Clone)]
pub struct EvaluationTask {
    /// Scheduling weight, lower runs first
    pub priority: i32,
    /// Enqueue time, used only as a tie-break
    pub created_at: DateTime<Utc>,
    pub submission: Submission,
    /// Short-retry attempts in the current cycle
    pub retry_count: u32,
    pub max_retries: u32,
    /// Escalated-retry cycles, never reset
    pub long_retry_count: u32,
    pub max_long_retries: u32,
    pub last_error: String,
}

impl EvaluationTask {
    /// Create a fresh task with zeroed counters
    pub fn new(submission: Submission, priority: i32, limits: RetryLimits) -> Self {
        Self {
            priority,
            created_at: Utc::now(),
            submission,
            retry_count: 0,
            max_retries: limits.max_retries,
            long_retry_count: 0,
            max_long_retries: limits.max_long_retries,
            last_error: String::new(),
        }
    }

    pub fn result_id(&self) -> &str {
        &self.submission.result_id
    }

    pub fn exam_id(&self) -> &str {
        &self.submission.exam_id
    }

    pub fn candidate_name(&self) -> &str {
        &self.submission.candidate_name
    }

    /// Upper bound on automatic attempts before a permanent failure
    pub fn attempt_budget(&self) -> u32 {
        self.max_retries * (self.max_long_retries + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_submission() -> Submission {
        Submission::new("r1", "s1", "e1", "Ada", "c1", vec![Question::mcq("q1", 4.0, 2)])
    }

    #[test]
    fn test_section_penalty_alias() {
        let json = r#"{"enabled": true, "mcq_negative_marks": 0.25}"#;
        let p: SectionPenalty = serde_json::from_str(json).unwrap();
        assert!(p.enabled);
        assert_eq!(p.penalty_per_wrong, 0.25);
        assert!(!p.apply_to_unanswered);
    }

    #[test]
    fn test_scoring_mode_default_partial() {
        assert_eq!(ScoringMode::default(), ScoringMode::Partial);
        let strict: ScoringMode = serde_json::from_str(r#""strict""#).unwrap();
        assert_eq!(strict, ScoringMode::Strict);
    }

    #[test]
    fn test_submission_deserialize_defaults() {
        let json = r#"{
            "session_id": "s1", "exam_id": "e1",
            "candidate_name": "Ada", "candidate_id": "c1",
            "questions": []
        }"#;
        let sub: Submission = serde_json::from_str(json).unwrap();
        assert!(sub.result_id.is_empty());
        assert!(sub.show_feedback);
        assert_eq!(sub.multi_select_scoring_mode, ScoringMode::Partial);
        assert!(sub.answers.is_empty());
    }

    #[test]
    fn test_new_task_has_zeroed_counters() {
        let task = EvaluationTask::new(sample_submission(), DEFAULT_PRIORITY, RetryLimits::default());
        assert_eq!(task.priority, 1);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.long_retry_count, 0);
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.max_long_retries, 6);
        assert!(task.last_error.is_empty());
        assert_eq!(task.result_id(), "r1");
        assert_eq!(task.exam_id(), "e1");
    }

    #[test]
    fn test_attempt_budget() {
        let limits = RetryLimits {
            max_retries: 3,
            max_long_retries: 2,
        };
        let task = EvaluationTask::new(sample_submission(), DEFAULT_PRIORITY, limits);
        assert_eq!(task.attempt_budget(), 9);
    }
}

//! Free-text answer evaluation
//!
//! The `Evaluator` trait is the seam between the queue and whatever scores
//! short and essay answers. `GroqEvaluator` talks to an OpenAI-compatible chat
//! completions API; `MockEvaluator` is a scripted stand-in for tests.

pub mod groq;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Question;

pub use groq::{GroqConfig, GroqEvaluator};
pub use mock::{MockEvaluator, MockReply};

/// Substrings that identify a quota or rate-limit failure
pub const QUOTA_PATTERNS: [&str; 5] = [
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "resource exhausted",
];

/// Scores one free-text answer
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate_free_text(&self, question: &Question, answer: &str) -> Result<FreeTextScore, EvaluatorError>;
}

/// Score returned by the evaluator for one answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeTextScore {
    /// Already clamped to `[0, question.marks]`
    pub marks_awarded: f64,
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl FreeTextScore {
    pub fn new(marks_awarded: f64, feedback: impl Into<String>) -> Self {
        Self {
            marks_awarded,
            feedback: feedback.into(),
            strengths: Vec::new(),
            improvements: Vec::new(),
        }
    }
}

/// Errors that can occur while evaluating an answer
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("Rate limited, retry after {retry_after:?}: {message}")]
    RateLimited { retry_after: Duration, message: String },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The evaluator answered, but not with a usable score
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Evaluator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("{0}")]
    Other(String),
}

impl EvaluatorError {
    /// Turn a raw error message into a typed error, recognising quota failures
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_quota_message(&message) {
            EvaluatorError::RateLimited {
                retry_after: Duration::ZERO,
                message,
            }
        } else {
            EvaluatorError::Other(message)
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EvaluatorError::RateLimited { .. })
    }

    /// Server-suggested wait, if this was a rate limit
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EvaluatorError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EvaluatorError::RateLimited { .. } => true,
            EvaluatorError::ApiError { status, .. } => *status >= 500 || *status == 408,
            EvaluatorError::Network(_) => true,
            EvaluatorError::MalformedResponse(_) => false,
            EvaluatorError::Timeout(_) => true,
            EvaluatorError::MissingApiKey { .. } => false,
            EvaluatorError::Other(_) => true,
        }
    }
}

/// Case-insensitive match against `QUOTA_PATTERNS`
pub fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_PATTERNS.iter().any(|p| lower.contains(p))
}

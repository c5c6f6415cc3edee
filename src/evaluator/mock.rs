//! Scripted evaluator for tests and local runs without an API key

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{Evaluator, EvaluatorError, FreeTextScore};
use crate::domain::Question;

/// One scripted reply
#[derive(Debug)]
pub enum MockReply {
    /// Award this fraction of the question's marks
    Award(f64),
    Score(FreeTextScore),
    Error(EvaluatorError),
    /// Panic inside the call
    Panic,
}

/// Evaluator that replays a script, then falls back to a fixed reply
///
/// Every call start time is recorded with tokio's clock so that paused-time
/// tests can assert on spacing.
#[derive(Debug)]
pub struct MockEvaluator {
    script: Mutex<VecDeque<MockReply>>,
    fallback_error: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Instant>>,
}

impl Default for MockEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEvaluator {
    /// Awards full marks once the script is empty
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback_error: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with an error built from `message`
    pub fn failing(message: &str) -> Self {
        Self {
            fallback_error: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn with_script(self, replies: Vec<MockReply>) -> Self {
        *lock(&self.script) = replies.into();
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, reply: MockReply) {
        lock(&self.script).push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        lock(&self.calls).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn evaluate_free_text(&self, question: &Question, _answer: &str) -> Result<FreeTextScore, EvaluatorError> {
        lock(&self.calls).push(Instant::now());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.script).pop_front();
        match next {
            Some(MockReply::Award(ratio)) => Ok(FreeTextScore::new(question.marks * ratio, "Scripted score")),
            Some(MockReply::Score(score)) => Ok(score),
            Some(MockReply::Error(err)) => Err(err),
            Some(MockReply::Panic) => panic!("scripted evaluator panic"),
            None => match &self.fallback_error {
                Some(message) => Err(EvaluatorError::classify(message.clone())),
                None => Ok(FreeTextScore::new(question.marks, "Well answered")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockEvaluator::new().with_script(vec![
            MockReply::Award(0.5),
            MockReply::Error(EvaluatorError::MalformedResponse("garbage".to_string())),
        ]);
        let q = Question::essay("q1", 10.0);

        let first = mock.evaluate_free_text(&q, "answer").await.unwrap();
        assert_eq!(first.marks_awarded, 5.0);

        let second = mock.evaluate_free_text(&q, "answer").await;
        assert!(matches!(second, Err(EvaluatorError::MalformedResponse(_))));

        let third = mock.evaluate_free_text(&q, "answer").await.unwrap();
        assert_eq!(third.marks_awarded, 10.0);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_classifies_quota() {
        let mock = MockEvaluator::failing("429 Too Many Requests");
        let q = Question::short("q1", 2.0);
        let err = mock.evaluate_free_text(&q, "answer").await.unwrap_err();
        assert!(err.is_rate_limit());
    }
}

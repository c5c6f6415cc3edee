//! Turning one task into a score breakdown

use tracing::{debug, warn};

use super::EvaluationQueue;
use crate::domain::{EvaluationTask, Question, QuestionResult, ScoreBreakdown};
use crate::evaluator::EvaluatorError;
use crate::scoring::{self, ScoringPlan};

impl EvaluationQueue {
    /// Score a task according to its plan
    ///
    /// Objective-only tasks never touch the rate limiter or the evaluator. A
    /// malformed evaluator reply sends that one question to manual review;
    /// any other evaluator error fails the whole attempt.
    pub(super) async fn evaluate(
        &self,
        task: &EvaluationTask,
        plan: &ScoringPlan,
    ) -> Result<ScoreBreakdown, EvaluatorError> {
        let submission = &task.submission;

        if !plan.needs_evaluator() {
            let results = scoring::score_objective(submission);
            self.record_evaluated(task.result_id(), results.len());
            return Ok(scoring::assemble(results));
        }

        let mut results = Vec::with_capacity(submission.questions.len());
        for question in &submission.questions {
            let result = if !question.question_type.is_free_text() {
                scoring::score_local(submission, question)
            } else {
                match submission.answer_for(&question.id).filter(|a| !a.is_blank()) {
                    Some(answer) => self.evaluate_free_text(task, question, &answer.as_text()).await?,
                    None => scoring::blank_free_text(question),
                }
            };
            results.push(result);
            self.record_evaluated(task.result_id(), results.len());
        }

        Ok(scoring::assemble(results))
    }

    async fn evaluate_free_text(
        &self,
        task: &EvaluationTask,
        question: &Question,
        answer: &str,
    ) -> Result<QuestionResult, EvaluatorError> {
        let limiter = &self.shared.limiter;
        let timeout = self.shared.config.evaluator_timeout();

        limiter.await_slot().await;
        debug!(result_id = %task.result_id(), question_id = %question.id, "Calling evaluator");

        let reply = tokio::time::timeout(timeout, self.shared.evaluator.evaluate_free_text(question, answer))
            .await
            .unwrap_or(Err(EvaluatorError::Timeout(timeout)));

        match reply {
            Ok(score) => {
                limiter.record_success().await;
                Ok(scoring::free_text_result(question, score))
            }
            Err(EvaluatorError::MalformedResponse(reason)) => {
                warn!(
                    result_id = %task.result_id(),
                    question_id = %question.id,
                    reason = %reason,
                    "Unusable evaluator reply, flagging for manual review"
                );
                Ok(scoring::manual_review_result(question))
            }
            Err(e) => {
                if e.is_rate_limit() {
                    limiter.record_rate_limit(e.retry_after().unwrap_or_default()).await;
                }
                Err(e)
            }
        }
    }
}

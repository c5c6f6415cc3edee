//! The worker loop and the state transitions it drives
//!
//! One worker task per queue. Each iteration pops at most one task and runs
//! it to a terminal state or a scheduled requeue. A panic inside an
//! iteration is caught here; only `stop()` ends the loop.

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{EvaluationQueue, status};
use crate::domain::{EvaluationTask, ProgressState, ScoreBreakdown};
use crate::scheduler::{RequeueKind, RetryDecision};
use crate::scoring::ScoringPlan;

pub(super) async fn run(queue: EvaluationQueue, mut shutdown: watch::Receiver<bool>) {
    let config = queue.shared.config.clone();
    let mut last_cleanup = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        if last_cleanup.elapsed() >= config.cleanup_interval() {
            queue.clear_old_status(config.status_retention());
            last_cleanup = Instant::now();
        }

        let Some(task) = next_task(&queue, &mut shutdown).await else {
            continue;
        };

        let result_id = task.result_id().to_string();
        let snapshot = task.clone();
        if let Err(panic) = AssertUnwindSafe(queue.process(task)).catch_unwind().await {
            let reason = panic_message(&*panic);
            error!(result_id = %result_id, panic = %reason, "Worker iteration panicked");
            queue.handle_failure(snapshot, format!("Internal error during evaluation: {}", reason));

            tokio::select! {
                _ = tokio::time::sleep(config.fault_backoff()) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    debug!("Evaluation worker exiting");
}

/// Pop the next task, waiting up to `poll_timeout` for one to arrive
async fn next_task(queue: &EvaluationQueue, shutdown: &mut watch::Receiver<bool>) -> Option<EvaluationTask> {
    if let Some(task) = queue.pop_next() {
        return Some(task);
    }

    tokio::select! {
        _ = queue.shared.notify.notified() => {}
        _ = tokio::time::sleep(queue.shared.config.poll_timeout()) => {}
        _ = shutdown.changed() => return None,
    }

    if *shutdown.borrow() {
        return None;
    }
    queue.pop_next()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn due_time(delay: Duration) -> DateTime<Utc> {
    let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
    Utc::now().checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl EvaluationQueue {
    fn pop_next(&self) -> Option<EvaluationTask> {
        let mut state = self.state();
        let task = state.pending.pop()?;
        state.in_flight.insert(task.result_id().to_string());
        Some(task)
    }

    async fn process(&self, task: EvaluationTask) {
        let result_id = task.result_id().to_string();

        match self.shared.store.is_paused(task.exam_id()) {
            Ok(true) => {
                self.defer_paused(task);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(result_id = %result_id, error = %e, "Could not read pause flag");
                self.handle_failure(task, format!("Failed to read pause flag: {}", e));
                return;
            }
        }

        self.begin_processing(&task);

        let plan = ScoringPlan::for_questions(&task.submission.questions);
        info!(
            result_id = %result_id,
            candidate = %task.candidate_name(),
            plan = plan.label(),
            free_text = plan.free_text_count(),
            "Evaluating submission"
        );

        let breakdown = match self.evaluate(&task, &plan).await {
            Ok(breakdown) => breakdown,
            Err(e) => {
                self.handle_failure(task, e.to_string());
                return;
            }
        };

        match self.shared.store.write_evaluation_result(&result_id, &breakdown) {
            Ok(true) => self.complete(task, breakdown),
            Ok(false) => self.handle_failure(task, "Failed to save evaluation result".to_string()),
            Err(e) => self.handle_failure(task, format!("Failed to save evaluation result: {}", e)),
        }
    }

    fn defer_paused(&self, task: EvaluationTask) {
        let delay = self.shared.config.pause_recheck_delay();
        info!(
            result_id = %task.result_id(),
            exam_id = %task.exam_id(),
            recheck_secs = delay.as_secs(),
            "Exam evaluation paused, deferring task"
        );
        self.reschedule(
            task,
            RequeueKind::PauseRecheck,
            delay,
            ProgressState::Paused,
            status::PAUSED_MESSAGE.to_string(),
        );
    }

    fn begin_processing(&self, task: &EvaluationTask) {
        let result_id = task.result_id();
        {
            let mut state = self.state();
            if let Some(record) = state.statuses.get_mut(result_id) {
                record.state = ProgressState::Processing;
                record.message = status::PROCESSING_MESSAGE.to_string();
                record.started_at = Some(Utc::now());
                record.next_retry_at = None;
                record.evaluated_questions = 0;
                record.mirror_counters(task);
            }
        }

        if let Err(e) = self.shared.store.mark_processing(result_id) {
            warn!(result_id = %result_id, error = %e, "Failed to persist processing status");
        }
    }

    /// Record how many questions of an in-flight task are scored
    pub(super) fn record_evaluated(&self, result_id: &str, evaluated: usize) {
        if let Some(record) = self.state().statuses.get_mut(result_id) {
            record.evaluated_questions = evaluated;
        }
    }

    fn complete(&self, task: EvaluationTask, breakdown: ScoreBreakdown) {
        let result_id = task.result_id().to_string();
        {
            let mut state = self.state();
            state.in_flight.remove(&result_id);
            if let Some(record) = state.statuses.get_mut(&result_id) {
                record.state = ProgressState::Completed;
                record.message = status::COMPLETED_MESSAGE.to_string();
                record.completed_at = Some(Utc::now());
                record.next_retry_at = None;
                record.evaluated_questions = record.total_questions;
                record.mirror_counters(&task);
            }
        }

        info!(
            result_id = %result_id,
            obtained = breakdown.obtained_marks,
            total = breakdown.total_marks,
            percentage = %format!("{:.1}", breakdown.percentage),
            manual_review = breakdown.needs_manual_review(),
            "Evaluation completed"
        );
        self.notify_complete(&result_id, &breakdown);
    }

    /// Feed a failed attempt through the retry policy and act on its decision
    pub(super) fn handle_failure(&self, mut task: EvaluationTask, error: String) {
        let result_id = task.result_id().to_string();

        match self.shared.policy.on_failure(&mut task, &error) {
            RetryDecision::ShortRetry { delay, attempt } => {
                warn!(
                    result_id = %result_id,
                    attempt,
                    max_retries = task.max_retries,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Evaluation failed, scheduling retry"
                );
                let message = status::short_retry_message(delay.as_secs(), attempt, task.max_retries);
                self.reschedule(task, RequeueKind::ShortRetry, delay, ProgressState::Retrying, message);
            }
            RetryDecision::LongRetry { delay, cycle } => {
                warn!(
                    result_id = %result_id,
                    cycle,
                    max_long_retries = task.max_long_retries,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Short retries exhausted, scheduling long retry"
                );
                let message = status::long_retry_message(delay.as_secs().div_ceil(60), cycle, task.max_long_retries);
                self.reschedule(task, RequeueKind::LongRetry, delay, ProgressState::LongRetryPending, message);
            }
            RetryDecision::PermanentFailure { total_attempts } => {
                error!(
                    result_id = %result_id,
                    total_attempts,
                    error = %task.last_error,
                    "All retries exhausted, handing off to manual review"
                );
                self.fail_permanently(task, total_attempts);
            }
        }
    }

    fn fail_permanently(&self, task: EvaluationTask, total_attempts: u32) {
        let result_id = task.result_id().to_string();

        // The store must hold the failure before it is reported; until then the
        // task stays scheduled and the next failed attempt tries again
        if let Err(e) = self.shared.store.mark_failed(&result_id, &task.last_error) {
            let delay = self.shared.policy.short_delay(1);
            error!(
                result_id = %result_id,
                error = %e,
                delay_secs = delay.as_secs(),
                "Failed to mark evaluation as failed, retrying"
            );
            let message = status::failure_unrecorded_message(delay.as_secs());
            self.reschedule(task, RequeueKind::ShortRetry, delay, ProgressState::Retrying, message);
            return;
        }

        {
            let mut state = self.state();
            state.in_flight.remove(&result_id);
            if let Some(record) = state.statuses.get_mut(&result_id) {
                record.state = ProgressState::Failed;
                record.message = status::FAILED_MESSAGE.to_string();
                record.failed_at = Some(Utc::now());
                record.next_retry_at = None;
                record.mirror_counters(&task);
                record.last_error = Some(format!(
                    "Evaluation failed after {} attempts. Manual review required.",
                    total_attempts
                ));
            }
        }

        self.notify_error(
            &result_id,
            &format!("Permanent failure after all retries: {}", task.last_error),
        );
    }

    /// Move a task from in-flight to a tracked timer that pushes it back after `delay`
    fn reschedule(
        &self,
        task: EvaluationTask,
        kind: RequeueKind,
        delay: Duration,
        progress: ProgressState,
        message: String,
    ) {
        let result_id = task.result_id().to_string();
        let due_at = due_time(delay);

        let mut state = self.state();
        state.in_flight.remove(&result_id);
        if let Some(record) = state.statuses.get_mut(&result_id) {
            record.state = progress;
            record.message = message;
            record.next_retry_at = Some(due_at);
            record.mirror_counters(&task);
        }

        // After stop() the task stays persisted as pending/processing for recovery
        if !self.is_running() {
            debug!(result_id = %result_id, kind = kind.as_str(), "Queue stopped, not scheduling requeue");
            return;
        }

        let queue = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.fire_requeue(task);
        });
        state.requeues.insert(&result_id, kind, due_at, handle);
    }

    fn fire_requeue(&self, task: EvaluationTask) {
        let result_id = task.result_id().to_string();
        {
            let mut state = self.state();
            let Some(kind) = state.requeues.complete(&result_id) else {
                debug!(result_id = %result_id, "Requeue was cancelled");
                return;
            };

            if let Some(record) = state.statuses.get_mut(&result_id) {
                record.next_retry_at = None;
                if kind == RequeueKind::LongRetry {
                    record.state = ProgressState::Pending;
                    record.message = status::long_retry_requeued_message(task.long_retry_count, task.max_long_retries);
                }
            }

            debug!(result_id = %result_id, kind = kind.as_str(), priority = task.priority, "Requeueing task");
            state.pending.push(task);
        }
        self.shared.notify.notify_one();
    }
}

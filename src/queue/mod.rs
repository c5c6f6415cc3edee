//! Background evaluation queue
//!
//! `EvaluationQueue` is a cheaply cloneable handle. Producers call `add_task`
//! (or `submit`, which persists first) and poll `get_status`; a single worker
//! task drains the priority queue, scores each submission and writes the
//! result to the durable store.
//!
//! The pending queue, the progress table, the in-flight set and the delayed
//! requeue registry share one mutex. It is never held across an await.

mod dispatch;
pub mod status;
mod worker;

pub use status::{ProgressRecord, StatusTable};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::{
    EvaluationStatus, EvaluationTask, HIGHEST_PRIORITY, ProgressState, ScoreBreakdown, Submission,
};
use crate::error::{EvalqError, Result};
use crate::evaluator::Evaluator;
use crate::scheduler::{DelayedRequeues, PriorityQueue, RateLimiter, RetryPolicy};
use crate::store::DurableStore;

/// Called with the result id and breakdown after a result is written
pub type CompletionCallback = Arc<dyn Fn(&str, &ScoreBreakdown) + Send + Sync>;

/// Called with the result id and an error message after a permanent failure
pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Candidate-facing status of one result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub result_id: String,
    pub status: EvaluationStatus,
    pub progress_state: ProgressState,
    /// 1-based position while waiting in the queue
    pub queue_position: Option<usize>,
    pub queue_size: usize,
    pub message: String,
    pub is_complete: bool,
    pub can_view_results: bool,
    pub queued_at: Option<DateTime<Utc>>,
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

/// Queue-wide counters for the admin dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_size: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub scheduled_retries: usize,
    pub is_running: bool,
    pub rate_limit: String,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: PriorityQueue,
    statuses: StatusTable,
    /// Popped by the worker and not yet finished or rescheduled
    in_flight: HashSet<String>,
    requeues: DelayedRequeues,
}

impl QueueState {
    fn is_active(&self, result_id: &str) -> bool {
        self.in_flight.contains(result_id) || self.requeues.contains(result_id) || self.pending.contains(result_id)
    }
}

#[derive(Default)]
struct Callbacks {
    on_complete: Vec<CompletionCallback>,
    on_error: Vec<ErrorCallback>,
}

struct WorkerHandle {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

struct Shared {
    config: QueueConfig,
    store: Arc<dyn DurableStore>,
    evaluator: Arc<dyn Evaluator>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    notify: Notify,
    running: AtomicBool,
    callbacks: Mutex<Callbacks>,
    worker: Mutex<Option<WorkerHandle>>,
}

/// Handle to the evaluation queue and its worker
#[derive(Clone)]
pub struct EvaluationQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EvaluationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationQueue")
            .field("is_running", &self.is_running())
            .field("rate_limit", &self.shared.limiter.label())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl EvaluationQueue {
    pub fn new(config: QueueConfig, store: Arc<dyn DurableStore>, evaluator: Arc<dyn Evaluator>) -> Self {
        let limiter = RateLimiter::new(config.requests_per_minute);
        let policy = config.retry_policy();
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                evaluator,
                limiter,
                policy,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
                callbacks: Mutex::new(Callbacks::default()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.shared.store
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.shared.state)
    }

    /// Spawn the worker; does nothing if it is already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = lock(&self.shared.worker);
        if worker.is_some() {
            debug!("Evaluation worker already running");
            return;
        }

        let (shutdown, rx) = watch::channel(false);
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(worker::run(self.clone(), rx));
        *worker = Some(WorkerHandle { handle, shutdown });

        info!(rate_limit = %self.shared.limiter.label(), "Evaluation worker started");
    }

    /// Stop the worker and cancel every scheduled requeue
    ///
    /// Waits up to `shutdown_grace` for the current iteration to finish, then
    /// aborts the worker. Cancelled requeues keep their persisted status and
    /// come back through recovery. Idempotent.
    pub async fn stop(&self) {
        let Some(WorkerHandle { mut handle, shutdown }) = lock(&self.shared.worker).take() else {
            return;
        };

        self.shared.running.store(false, Ordering::SeqCst);
        let _ = shutdown.send(true);
        self.shared.notify.notify_one();

        let cancelled = self.state().requeues.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled scheduled requeues");
        }

        let grace = self.shared.config.shutdown_grace();
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "Worker did not stop in time, aborting");
            handle.abort();
        }

        info!("Evaluation worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Admit a submission that is already persisted
    ///
    /// Fails with `DuplicateTask` while the same result id is queued, being
    /// evaluated, or waiting on a scheduled requeue.
    pub fn add_task(&self, submission: Submission, priority: i32) -> Result<()> {
        if submission.result_id.is_empty() {
            return Err(EvalqError::InvalidState("submission has no result id".to_string()));
        }

        let task = EvaluationTask::new(submission, priority, self.shared.config.retry_limits());
        let result_id = task.result_id().to_string();
        let candidate = task.candidate_name().to_string();

        let queue_size = {
            let mut state = self.state();
            if state.is_active(&result_id) {
                return Err(EvalqError::DuplicateTask(result_id));
            }
            state.statuses.insert(&result_id, ProgressRecord::queued(&task));
            state.pending.push(task);
            state.pending.len()
        };
        self.shared.notify.notify_one();

        info!(result_id = %result_id, candidate = %candidate, priority, queue_size, "Added evaluation task");
        Ok(())
    }

    /// Persist a submission, then admit it; returns the result id
    pub fn submit(&self, mut submission: Submission, priority: i32) -> Result<String> {
        let result_id = self.shared.store.persist_submission(&submission)?;
        submission.result_id = result_id.clone();
        self.add_task(submission, priority)?;
        Ok(result_id)
    }

    /// Current status of one result
    pub fn get_status(&self, result_id: &str) -> StatusView {
        let state = self.state();
        let queue_size = state.pending.len();

        let Some(record) = state.statuses.get(result_id) else {
            return StatusView {
                result_id: result_id.to_string(),
                status: EvaluationStatus::Pending,
                progress_state: ProgressState::Pending,
                queue_position: None,
                queue_size,
                message: status::UNKNOWN_MESSAGE.to_string(),
                is_complete: false,
                can_view_results: false,
                queued_at: None,
                started_at: None,
                completed_at: None,
                failed_at: None,
                next_retry_at: None,
                retry_count: 0,
                max_retries: 0,
                long_retry_count: 0,
                max_long_retries: 0,
                total_questions: 0,
                evaluated_questions: 0,
                last_error: None,
            };
        };

        let next_retry_at = state
            .requeues
            .get(result_id)
            .map(|(_, due_at)| due_at)
            .or(record.next_retry_at);

        StatusView {
            result_id: result_id.to_string(),
            status: record.status(),
            progress_state: record.state,
            queue_position: state.pending.position(result_id),
            queue_size,
            message: record.message.clone(),
            is_complete: record.state.is_terminal(),
            can_view_results: record.state == ProgressState::Completed,
            queued_at: Some(record.queued_at),
            started_at: record.started_at,
            completed_at: record.completed_at,
            failed_at: record.failed_at,
            next_retry_at,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            long_retry_count: record.long_retry_count,
            max_long_retries: record.max_long_retries,
            total_questions: record.total_questions,
            evaluated_questions: record.evaluated_questions,
            last_error: record.last_error.clone(),
        }
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let state = self.state();
        QueueStats {
            queue_size: state.pending.len(),
            pending: state.statuses.count(EvaluationStatus::Pending),
            processing: state.statuses.count(EvaluationStatus::Processing),
            completed: state.statuses.count(EvaluationStatus::Completed),
            failed: state.statuses.count(EvaluationStatus::Failed),
            scheduled_retries: state.requeues.len(),
            is_running: self.is_running(),
            rate_limit: self.shared.limiter.label(),
        }
    }

    /// Re-admit a permanently failed result with fresh counters at the highest priority
    pub fn retry_failed(&self, result_id: &str) -> Result<()> {
        match self.shared.store.reset_failed(result_id)? {
            Some(submission) => {
                info!(result_id = %result_id, "Re-queueing failed evaluation");
                self.add_task(submission, HIGHEST_PRIORITY)
            }
            None => match self.shared.store.evaluation_status(result_id)? {
                None => Err(EvalqError::ResultNotFound(result_id.to_string())),
                Some(stored) => Err(EvalqError::InvalidState(format!(
                    "{} is {}, only failed evaluations can be retried",
                    result_id, stored.status
                ))),
            },
        }
    }

    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&str, &ScoreBreakdown) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).on_complete.push(Arc::new(callback));
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).on_error.push(Arc::new(callback));
    }

    /// Drop terminal progress records older than `max_age`; returns how many
    pub fn clear_old_status(&self, max_age: Duration) -> usize {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let purged = self.state().statuses.purge_older_than(cutoff);
        if purged > 0 {
            info!(purged, "Cleared old evaluation statuses");
        }
        purged
    }

    /// Queued tasks in dispatch order
    pub fn pending_snapshot(&self) -> Vec<EvaluationTask> {
        self.state().pending.snapshot().into_iter().cloned().collect()
    }

    fn notify_complete(&self, result_id: &str, breakdown: &ScoreBreakdown) {
        let callbacks = lock(&self.shared.callbacks).on_complete.clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(result_id, breakdown))).is_err() {
                error!(result_id = %result_id, "Completion callback panicked");
            }
        }
    }

    fn notify_error(&self, result_id: &str, message: &str) {
        let callbacks = lock(&self.shared.callbacks).on_error.clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(result_id, message))).is_err() {
                error!(result_id = %result_id, "Error callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DEFAULT_PRIORITY, Question};
    use crate::evaluator::MockEvaluator;
    use crate::store::MemoryStore;

    fn queue_with(store: Arc<MemoryStore>) -> EvaluationQueue {
        EvaluationQueue::new(QueueConfig::default(), store, Arc::new(MockEvaluator::new()))
    }

    fn submission(id: &str) -> Submission {
        Submission::new(id, "s", "exam-1", "Ada", "c", vec![Question::mcq("q1", 2.0, 0)]).with_answer("q1", "0")
    }

    #[test]
    fn test_add_task_rejects_duplicates() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue.add_task(submission("r1"), DEFAULT_PRIORITY).unwrap();

        let err = queue.add_task(submission("r1"), DEFAULT_PRIORITY).unwrap_err();
        assert!(matches!(err, EvalqError::DuplicateTask(id) if id == "r1"));
        assert_eq!(queue.get_queue_stats().queue_size, 1);
    }

    #[test]
    fn test_add_task_requires_result_id() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let err = queue.add_task(submission(""), DEFAULT_PRIORITY).unwrap_err();
        assert!(matches!(err, EvalqError::InvalidState(_)));
    }

    #[test]
    fn test_status_reports_queue_position() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue.add_task(submission("low"), 2).unwrap();
        queue.add_task(submission("high"), 0).unwrap();

        let status = queue.get_status("low");
        assert_eq!(status.status, EvaluationStatus::Pending);
        assert_eq!(status.queue_position, Some(2));
        assert_eq!(status.queue_size, 2);
        assert_eq!(status.message, status::QUEUED_MESSAGE);
        assert!(!status.is_complete);
        assert_eq!(queue.get_status("high").queue_position, Some(1));
    }

    #[test]
    fn test_unknown_status_is_pending() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let status = queue.get_status("nope");
        assert_eq!(status.status, EvaluationStatus::Pending);
        assert_eq!(status.queue_position, None);
        assert!(!status.can_view_results);
        assert_eq!(status.message, status::UNKNOWN_MESSAGE);
    }

    #[test]
    fn test_stats_before_start() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue.add_task(submission("a"), DEFAULT_PRIORITY).unwrap();
        queue.add_task(submission("b"), DEFAULT_PRIORITY).unwrap();

        let stats = queue.get_queue_stats();
        assert_eq!(stats.queue_size, 2);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 0);
        assert!(!stats.is_running);
        assert_eq!(stats.rate_limit, "10/min");
    }

    #[test]
    fn test_submit_persists_then_queues() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());

        let id = queue.submit(submission(""), DEFAULT_PRIORITY).unwrap();
        assert!(id.starts_with("res-"));
        assert_eq!(store.persist_calls(), 1);
        assert_eq!(queue.pending_snapshot()[0].result_id(), id);
    }

    #[test]
    fn test_retry_failed_errors() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());

        assert!(matches!(queue.retry_failed("ghost"), Err(EvalqError::ResultNotFound(_))));

        store.persist_submission(&submission("r1")).unwrap();
        assert!(matches!(queue.retry_failed("r1"), Err(EvalqError::InvalidState(_))));
    }

    #[test]
    fn test_retry_failed_requeues_at_highest_priority() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        store.persist_submission(&submission("r1")).unwrap();
        store.mark_failed("r1", "down").unwrap();

        queue.retry_failed("r1").unwrap();
        let pending = queue.pending_snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, HIGHEST_PRIORITY);
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(store.status_of("r1"), Some(EvaluationStatus::Pending));
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        queue.on_error(|_, _| panic!("boom"));
        let seen = calls.clone();
        queue.on_error(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        queue.notify_error("r1", "gone");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        queue.start();
        queue.start();
        assert!(queue.is_running());
        queue.stop().await;
        queue.stop().await;
        assert!(!queue.is_running());
    }
}

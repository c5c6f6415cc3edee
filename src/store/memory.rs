//! In-memory durable store.
//!
//! Keeps submissions in a map and counts calls to the write operations, so
//! tests can assert on how often the queue touched the store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, MANUAL_REVIEW_LABEL, PENDING_LABEL, StatusCounts, StoredEvaluation};
use crate::domain::{EvaluationStatus, ScoreBreakdown, Submission};
use crate::error::{EvalqError, Result};
use crate::id::{generate_result_id, now_ms};

#[derive(Debug, Clone)]
struct Row {
    submission: Submission,
    status: EvaluationStatus,
    error: Option<String>,
    performance_level: String,
    submitted_at: i64,
    seq: u64,
    evaluated_at: Option<i64>,
    breakdown: Option<ScoreBreakdown>,
    retry_requested: bool,
}

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<String, Row>,
    paused: HashSet<String>,
    next_seq: u64,
}

/// Durable store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    persist_calls: AtomicUsize,
    write_calls: AtomicUsize,
    mark_failed_calls: AtomicUsize,
    reject_writes: AtomicBool,
    fail_mark_failed: AtomicBool,
    fail_pause_checks: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `write_evaluation_result` report `false` without writing
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make `mark_failed` return a storage error without writing
    pub fn fail_mark_failed(&self, fail: bool) {
        self.fail_mark_failed.store(fail, Ordering::SeqCst);
    }

    /// Make `is_paused` return a storage error
    pub fn fail_pause_checks(&self, fail: bool) {
        self.fail_pause_checks.store(fail, Ordering::SeqCst);
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Number of `write_evaluation_result` calls, accepted or not
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn mark_failed_calls(&self) -> usize {
        self.mark_failed_calls.load(Ordering::SeqCst)
    }

    /// Persisted status of one submission
    pub fn status_of(&self, result_id: &str) -> Option<EvaluationStatus> {
        self.inner().rows.get(result_id).map(|r| r.status)
    }

    /// Stored breakdown of a completed submission
    pub fn breakdown_of(&self, result_id: &str) -> Option<ScoreBreakdown> {
        self.inner().rows.get(result_id).and_then(|r| r.breakdown.clone())
    }
}

impl DurableStore for MemoryStore {
    fn persist_submission(&self, submission: &Submission) -> Result<String> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);

        let mut submission = submission.clone();
        if submission.result_id.is_empty() {
            submission.result_id = generate_result_id();
        }

        let mut inner = self.inner();
        if inner.rows.contains_key(&submission.result_id) {
            return Err(EvalqError::DuplicateTask(submission.result_id));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let result_id = submission.result_id.clone();
        inner.rows.insert(
            result_id.clone(),
            Row {
                submission,
                status: EvaluationStatus::Pending,
                error: None,
                performance_level: PENDING_LABEL.to_string(),
                submitted_at: now_ms(),
                seq,
                evaluated_at: None,
                breakdown: None,
                retry_requested: false,
            },
        );
        Ok(result_id)
    }

    fn write_evaluation_result(&self, result_id: &str, breakdown: &ScoreBreakdown) -> Result<bool> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let mut inner = self.inner();
        let Some(row) = inner.rows.get_mut(result_id) else {
            return Ok(false);
        };
        row.status = EvaluationStatus::Completed;
        row.error = None;
        row.performance_level = breakdown.performance_level.as_str().to_string();
        row.evaluated_at = Some(now_ms());
        row.breakdown = Some(breakdown.clone());
        Ok(true)
    }

    fn mark_failed(&self, result_id: &str, error_message: &str) -> Result<bool> {
        self.mark_failed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mark_failed.load(Ordering::SeqCst) {
            return Err(EvalqError::Storage("mark_failed unavailable".to_string()));
        }

        let mut inner = self.inner();
        let Some(row) = inner.rows.get_mut(result_id) else {
            return Ok(false);
        };
        row.status = EvaluationStatus::Failed;
        row.error = Some(error_message.to_string());
        row.performance_level = MANUAL_REVIEW_LABEL.to_string();
        row.evaluated_at = Some(now_ms());
        Ok(true)
    }

    fn is_paused(&self, exam_id: &str) -> Result<bool> {
        if self.fail_pause_checks.load(Ordering::SeqCst) {
            return Err(EvalqError::Storage("pause flags unavailable".to_string()));
        }
        Ok(self.inner().paused.contains(exam_id))
    }

    fn load_pending_for_recovery(&self) -> Result<Vec<Submission>> {
        let inner = self.inner();
        let mut rows: Vec<&Row> = inner
            .rows
            .values()
            .filter(|r| r.status.is_recoverable())
            .collect();
        rows.sort_by_key(|r| (r.submitted_at, r.seq));
        Ok(rows.into_iter().map(|r| r.submission.clone()).collect())
    }

    fn mark_processing(&self, result_id: &str) -> Result<bool> {
        let mut inner = self.inner();
        match inner.rows.get_mut(result_id) {
            Some(row) if row.status.is_recoverable() => {
                row.status = EvaluationStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn set_paused(&self, exam_id: &str, paused: bool) -> Result<()> {
        let mut inner = self.inner();
        if paused {
            inner.paused.insert(exam_id.to_string());
        } else {
            inner.paused.remove(exam_id);
        }
        Ok(())
    }

    fn reset_failed(&self, result_id: &str) -> Result<Option<Submission>> {
        let mut inner = self.inner();
        match inner.rows.get_mut(result_id) {
            Some(row) if row.status == EvaluationStatus::Failed => {
                row.status = EvaluationStatus::Pending;
                row.error = None;
                row.performance_level = PENDING_LABEL.to_string();
                row.retry_requested = true;
                Ok(Some(row.submission.clone()))
            }
            _ => Ok(None),
        }
    }

    fn take_retry_requests(&self) -> Result<Vec<Submission>> {
        let mut inner = self.inner();
        let mut rows: Vec<&mut Row> = inner.rows.values_mut().filter(|r| r.retry_requested).collect();
        rows.sort_by_key(|r| (r.submitted_at, r.seq));

        let mut taken = Vec::new();
        for row in rows {
            row.retry_requested = false;
            if row.status.is_recoverable() {
                taken.push(row.submission.clone());
            }
        }
        Ok(taken)
    }

    fn evaluation_status(&self, result_id: &str) -> Result<Option<StoredEvaluation>> {
        let inner = self.inner();
        Ok(inner.rows.get(result_id).map(|row| {
            let (total_marks, obtained_marks, percentage) = match &row.breakdown {
                Some(b) => (b.total_marks, b.obtained_marks, b.percentage),
                None => (row.submission.questions.iter().map(|q| q.marks).sum(), 0.0, 0.0),
            };
            StoredEvaluation {
                result_id: result_id.to_string(),
                exam_id: row.submission.exam_id.clone(),
                candidate_name: row.submission.candidate_name.clone(),
                candidate_id: row.submission.candidate_id.clone(),
                status: row.status,
                error: row.error.clone(),
                performance_level: row.performance_level.clone(),
                total_marks,
                obtained_marks,
                percentage,
                submitted_at: row.submitted_at,
                evaluated_at: row.evaluated_at,
                breakdown: row.breakdown.clone(),
            }
        }))
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for row in self.inner().rows.values() {
            counts.add(row.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Question;
    use crate::scoring;

    fn submission(result_id: &str) -> Submission {
        Submission::new(result_id, "s", "exam-1", "Ada", "c", vec![Question::mcq("q1", 2.0, 0)]).with_answer("q1", "0")
    }

    #[test]
    fn test_persist_and_recover_in_order() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.persist_submission(&submission(id)).unwrap();
        }
        let ids: Vec<String> = store
            .load_pending_for_recovery()
            .unwrap()
            .into_iter()
            .map(|s| s.result_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.persist_calls(), 3);
    }

    #[test]
    fn test_write_counts_and_rejection() {
        let store = MemoryStore::new();
        store.persist_submission(&submission("a")).unwrap();
        let breakdown = scoring::assemble(scoring::score_objective(&submission("a")));

        store.reject_writes(true);
        assert!(!store.write_evaluation_result("a", &breakdown).unwrap());
        assert_eq!(store.status_of("a"), Some(EvaluationStatus::Pending));

        store.reject_writes(false);
        assert!(store.write_evaluation_result("a", &breakdown).unwrap());
        assert_eq!(store.status_of("a"), Some(EvaluationStatus::Completed));
        assert_eq!(store.write_calls(), 2);
        assert_eq!(store.breakdown_of("a").unwrap().obtained_marks, 2.0);
    }

    #[test]
    fn test_failed_then_reset() {
        let store = MemoryStore::new();
        store.persist_submission(&submission("a")).unwrap();
        assert!(store.mark_failed("a", "down").unwrap());
        assert_eq!(store.mark_failed_calls(), 1);
        assert!(store.load_pending_for_recovery().unwrap().is_empty());

        let stored = store.evaluation_status("a").unwrap().unwrap();
        assert_eq!(stored.performance_level, MANUAL_REVIEW_LABEL);

        assert!(store.reset_failed("a").unwrap().is_some());
        assert!(store.reset_failed("a").unwrap().is_none());
        assert_eq!(store.status_counts().unwrap().pending, 1);
    }

    #[test]
    fn test_injected_failures() {
        let store = MemoryStore::new();
        store.persist_submission(&submission("a")).unwrap();

        store.fail_mark_failed(true);
        assert!(matches!(store.mark_failed("a", "down"), Err(EvalqError::Storage(_))));
        assert_eq!(store.status_of("a"), Some(EvaluationStatus::Pending));
        store.fail_mark_failed(false);
        assert!(store.mark_failed("a", "down").unwrap());
        assert_eq!(store.mark_failed_calls(), 2);

        store.fail_pause_checks(true);
        assert!(matches!(store.is_paused("exam-1"), Err(EvalqError::Storage(_))));
        store.fail_pause_checks(false);
        assert!(!store.is_paused("exam-1").unwrap());
    }

    #[test]
    fn test_take_retry_requests() {
        let store = MemoryStore::new();
        for id in ["a", "b"] {
            store.persist_submission(&submission(id)).unwrap();
            store.mark_failed(id, "down").unwrap();
            store.reset_failed(id).unwrap();
        }
        let breakdown = scoring::assemble(scoring::score_objective(&submission("b")));
        store.write_evaluation_result("b", &breakdown).unwrap();

        let taken: Vec<String> = store
            .take_retry_requests()
            .unwrap()
            .into_iter()
            .map(|s| s.result_id)
            .collect();
        assert_eq!(taken, vec!["a"]);
        assert!(store.take_retry_requests().unwrap().is_empty());
    }

    #[test]
    fn test_pause_flag() {
        let store = MemoryStore::new();
        store.set_paused("exam-1", true).unwrap();
        assert!(store.is_paused("exam-1").unwrap());
        assert!(!store.is_paused("exam-2").unwrap());
        store.set_paused("exam-1", false).unwrap();
        assert!(!store.is_paused("exam-1").unwrap());
    }
}

//! SQLite-backed durable store.
//!
//! One row per submission in `submissions`; the submitted answers and question
//! snapshot live in `json_data`, the scored breakdown in `result_json`. The
//! per-exam pause flag lives in `exams`.

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, MANUAL_REVIEW_LABEL, PENDING_LABEL, StatusCounts, StoredEvaluation};
use crate::domain::{EvaluationStatus, ScoreBreakdown, Submission};
use crate::error::{EvalqError, Result};
use crate::id::{generate_result_id, now_ms};

/// Database file name inside the data directory
pub const DB_FILE: &str = "evalq.db";

/// Durable store on a single SQLite connection
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Open or create the store inside `data_dir`
    pub fn open_at(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DB_FILE);
        let conn = Connection::open(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init_schema(&conn)?;

        tracing::debug!(path = %path.display(), "Opened evaluation store");
        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    /// Store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exams (
                id TEXT PRIMARY KEY,
                evaluation_paused INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS submissions (
                result_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                exam_id TEXT NOT NULL,
                candidate_name TEXT NOT NULL,
                candidate_id TEXT NOT NULL,
                evaluation_status TEXT NOT NULL,
                evaluation_error TEXT,
                performance_level TEXT NOT NULL,
                total_marks REAL NOT NULL DEFAULT 0,
                obtained_marks REAL NOT NULL DEFAULT 0,
                negative_marks REAL NOT NULL DEFAULT 0,
                percentage REAL NOT NULL DEFAULT 0,
                submitted_at INTEGER NOT NULL,
                evaluated_at INTEGER,
                json_data TEXT NOT NULL,
                result_json TEXT,
                retry_requested INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(evaluation_status);
            CREATE INDEX IF NOT EXISTS idx_submissions_exam ON submissions(exam_id);
            CREATE INDEX IF NOT EXISTS idx_submissions_submitted ON submissions(submitted_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load_submission(conn: &Connection, result_id: &str) -> Result<Option<Submission>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT json_data FROM submissions WHERE result_id = ?1",
                params![result_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => decode_submission(result_id, &json).map(Some),
            None => Ok(None),
        }
    }

    /// Decode every row in `rows`; rows that do not decode are marked failed
    fn decode_rows(conn: &Connection, rows: Vec<(String, String)>) -> Result<Vec<Submission>> {
        let mut submissions = Vec::with_capacity(rows.len());
        for (result_id, json) in rows {
            match decode_submission(&result_id, &json) {
                Ok(submission) => submissions.push(submission),
                Err(e) => {
                    tracing::warn!(result_id = %result_id, error = %e, "Skipping unreadable submission");
                    conn.execute(
                        r#"
                        UPDATE submissions
                        SET evaluation_status = ?1, evaluation_error = ?2, performance_level = ?3,
                            evaluated_at = ?4, retry_requested = 0
                        WHERE result_id = ?5
                        "#,
                        params![
                            EvaluationStatus::Failed.as_str(),
                            e.to_string(),
                            MANUAL_REVIEW_LABEL,
                            now_ms(),
                            result_id,
                        ],
                    )?;
                }
            }
        }
        Ok(submissions)
    }
}

fn decode_submission(result_id: &str, json: &str) -> Result<Submission> {
    serde_json::from_str(json)
        .map_err(|e| EvalqError::Storage(format!("submission {} has unreadable data: {}", result_id, e)))
}

fn row_to_evaluation(row: &Row<'_>) -> rusqlite::Result<(StoredEvaluation, String, Option<String>)> {
    let status: String = row.get(4)?;
    let result_json: Option<String> = row.get(12)?;
    let evaluation = StoredEvaluation {
        result_id: row.get(0)?,
        exam_id: row.get(1)?,
        candidate_name: row.get(2)?,
        candidate_id: row.get(3)?,
        status: EvaluationStatus::Pending,
        error: row.get(5)?,
        performance_level: row.get(6)?,
        total_marks: row.get(7)?,
        obtained_marks: row.get(8)?,
        percentage: row.get(9)?,
        submitted_at: row.get(10)?,
        evaluated_at: row.get(11)?,
        breakdown: None,
    };
    Ok((evaluation, status, result_json))
}

impl DurableStore for SqliteStore {
    fn persist_submission(&self, submission: &Submission) -> Result<String> {
        let mut submission = submission.clone();
        if submission.result_id.is_empty() {
            submission.result_id = generate_result_id();
        }
        let total_marks: f64 = submission.questions.iter().map(|q| q.marks).sum();
        let json_data = serde_json::to_string(&submission)?;

        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM submissions WHERE result_id = ?1)",
            params![submission.result_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(EvalqError::DuplicateTask(submission.result_id));
        }

        conn.execute(
            r#"
            INSERT INTO submissions
            (result_id, session_id, exam_id, candidate_name, candidate_id,
             evaluation_status, performance_level, total_marks, submitted_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                submission.result_id,
                submission.session_id,
                submission.exam_id,
                submission.candidate_name,
                submission.candidate_id,
                EvaluationStatus::Pending.as_str(),
                PENDING_LABEL,
                total_marks,
                now_ms(),
                json_data,
            ],
        )?;

        tracing::info!(
            result_id = %submission.result_id,
            candidate = %submission.candidate_name,
            "Submission saved for evaluation"
        );
        Ok(submission.result_id)
    }

    fn write_evaluation_result(&self, result_id: &str, breakdown: &ScoreBreakdown) -> Result<bool> {
        let result_json = serde_json::to_string(breakdown)?;
        let updated = self.conn().execute(
            r#"
            UPDATE submissions
            SET total_marks = ?1, obtained_marks = ?2, negative_marks = ?3, percentage = ?4,
                performance_level = ?5, evaluation_status = ?6, evaluation_error = NULL,
                evaluated_at = ?7, result_json = ?8
            WHERE result_id = ?9
            "#,
            params![
                breakdown.total_marks,
                breakdown.obtained_marks,
                breakdown.negative_marks,
                breakdown.percentage,
                breakdown.performance_level.as_str(),
                EvaluationStatus::Completed.as_str(),
                now_ms(),
                result_json,
                result_id,
            ],
        )?;
        Ok(updated > 0)
    }

    fn mark_failed(&self, result_id: &str, error_message: &str) -> Result<bool> {
        let updated = self.conn().execute(
            r#"
            UPDATE submissions
            SET evaluation_status = ?1, evaluation_error = ?2, performance_level = ?3, evaluated_at = ?4
            WHERE result_id = ?5
            "#,
            params![
                EvaluationStatus::Failed.as_str(),
                error_message,
                MANUAL_REVIEW_LABEL,
                now_ms(),
                result_id,
            ],
        )?;
        Ok(updated > 0)
    }

    fn is_paused(&self, exam_id: &str) -> Result<bool> {
        let paused: Option<bool> = self
            .conn()
            .query_row(
                "SELECT evaluation_paused FROM exams WHERE id = ?1",
                params![exam_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(paused.unwrap_or(false))
    }

    fn load_pending_for_recovery(&self) -> Result<Vec<Submission>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT result_id, json_data FROM submissions
            WHERE evaluation_status IN ('pending', 'processing')
            ORDER BY submitted_at ASC, rowid ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Self::decode_rows(&conn, rows)
    }

    fn take_retry_requests(&self) -> Result<Vec<Submission>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT result_id, json_data FROM submissions
            WHERE retry_requested = 1 AND evaluation_status IN ('pending', 'processing')
            ORDER BY submitted_at ASC, rowid ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        conn.execute("UPDATE submissions SET retry_requested = 0 WHERE retry_requested = 1", [])?;
        Self::decode_rows(&conn, rows)
    }

    fn mark_processing(&self, result_id: &str) -> Result<bool> {
        let updated = self.conn().execute(
            r#"
            UPDATE submissions SET evaluation_status = 'processing'
            WHERE result_id = ?1 AND evaluation_status IN ('pending', 'processing')
            "#,
            params![result_id],
        )?;
        Ok(updated > 0)
    }

    fn set_paused(&self, exam_id: &str, paused: bool) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO exams (id, evaluation_paused, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET evaluation_paused = excluded.evaluation_paused,
                                          updated_at = excluded.updated_at
            "#,
            params![exam_id, paused, now_ms()],
        )?;
        Ok(())
    }

    fn reset_failed(&self, result_id: &str) -> Result<Option<Submission>> {
        let conn = self.conn();
        let updated = conn.execute(
            r#"
            UPDATE submissions
            SET evaluation_status = 'pending', evaluation_error = NULL, performance_level = ?1,
                retry_requested = 1
            WHERE result_id = ?2 AND evaluation_status = 'failed'
            "#,
            params![PENDING_LABEL, result_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::load_submission(&conn, result_id)
    }

    fn evaluation_status(&self, result_id: &str) -> Result<Option<StoredEvaluation>> {
        let row = self
            .conn()
            .query_row(
                r#"
                SELECT result_id, exam_id, candidate_name, candidate_id, evaluation_status,
                       evaluation_error, performance_level, total_marks, obtained_marks,
                       percentage, submitted_at, evaluated_at, result_json
                FROM submissions WHERE result_id = ?1
                "#,
                params![result_id],
                row_to_evaluation,
            )
            .optional()?;

        let Some((mut evaluation, status, result_json)) = row else {
            return Ok(None);
        };
        evaluation.status = status.parse()?;
        evaluation.breakdown = match result_json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(Some(evaluation))
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT evaluation_status, COUNT(*) FROM submissions GROUP BY evaluation_status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            let status: EvaluationStatus = status.parse()?;
            for _ in 0..count {
                counts.add(status);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Question, SectionPenalty};
    use crate::scoring;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open_at(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn submission(result_id: &str) -> Submission {
        Submission::new(
            result_id,
            "sess-1",
            "exam-1",
            "Ada",
            "cand-1",
            vec![Question::mcq("q1", 4.0, 2), Question::essay("q2", 10.0)],
        )
        .with_answer("q1", "2")
        .with_answer("q2", "An essay")
        .with_penalty("technical", SectionPenalty::per_wrong(1.0))
    }

    #[test]
    fn test_persist_and_load_pending() {
        let (store, _temp) = create_test_store();
        let id = store.persist_submission(&submission("r1")).unwrap();
        assert_eq!(id, "r1");

        let pending = store.load_pending_for_recovery().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], submission("r1"));
    }

    #[test]
    fn test_persist_assigns_id() {
        let (store, _temp) = create_test_store();
        let id = store.persist_submission(&submission("")).unwrap();
        assert!(id.starts_with("res-"));
        let stored = store.evaluation_status(&id).unwrap().unwrap();
        assert_eq!(stored.status, EvaluationStatus::Pending);
        assert_eq!(stored.total_marks, 14.0);
        assert_eq!(stored.performance_level, PENDING_LABEL);
    }

    #[test]
    fn test_persist_duplicate_rejected() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        let err = store.persist_submission(&submission("r1")).unwrap_err();
        assert!(matches!(err, EvalqError::DuplicateTask(_)));
    }

    #[test]
    fn test_write_result_completes() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        assert!(store.mark_processing("r1").unwrap());

        let breakdown = scoring::assemble(scoring::score_objective(&submission("r1")));
        assert!(store.write_evaluation_result("r1", &breakdown).unwrap());

        let stored = store.evaluation_status("r1").unwrap().unwrap();
        assert_eq!(stored.status, EvaluationStatus::Completed);
        assert!(stored.is_complete());
        assert!(stored.evaluated_at.is_some());
        let saved = stored.breakdown.unwrap();
        assert_eq!(saved.obtained_marks, 4.0);
        assert_eq!(saved.question_results.len(), breakdown.question_results.len());
        assert!(store.load_pending_for_recovery().unwrap().is_empty());
    }

    #[test]
    fn test_write_result_unknown_id() {
        let (store, _temp) = create_test_store();
        let breakdown = scoring::assemble(Vec::new());
        assert!(!store.write_evaluation_result("nope", &breakdown).unwrap());
        assert!(!store.mark_failed("nope", "err").unwrap());
    }

    #[test]
    fn test_processing_rows_are_recovered() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        store.persist_submission(&submission("r2")).unwrap();
        store.mark_processing("r2").unwrap();

        let ids: Vec<String> = store
            .load_pending_for_recovery()
            .unwrap()
            .into_iter()
            .map(|s| s.result_id)
            .collect();
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn test_mark_failed_and_reset() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();

        assert!(store.reset_failed("r1").unwrap().is_none());

        assert!(store.mark_failed("r1", "evaluator down").unwrap());
        let stored = store.evaluation_status("r1").unwrap().unwrap();
        assert_eq!(stored.status, EvaluationStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("evaluator down"));
        assert_eq!(stored.performance_level, MANUAL_REVIEW_LABEL);
        assert!(!store.mark_processing("r1").unwrap());

        let reset = store.reset_failed("r1").unwrap().unwrap();
        assert_eq!(reset.result_id, "r1");
        let stored = store.evaluation_status("r1").unwrap().unwrap();
        assert_eq!(stored.status, EvaluationStatus::Pending);
        assert!(stored.error.is_none());
    }

    fn insert_corrupt_row(store: &SqliteStore, result_id: &str) {
        store
            .conn()
            .execute(
                r#"
                INSERT INTO submissions
                (result_id, session_id, exam_id, candidate_name, candidate_id,
                 evaluation_status, performance_level, submitted_at, json_data)
                VALUES (?1, 'sess-1', 'exam-1', 'Bob', 'cand-2', 'pending', ?2, ?3, '{not json')
                "#,
                params![result_id, PENDING_LABEL, now_ms()],
            )
            .unwrap();
    }

    #[test]
    fn test_unreadable_row_does_not_block_recovery() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        insert_corrupt_row(&store, "bad");
        store.persist_submission(&submission("r2")).unwrap();

        let ids: Vec<String> = store
            .load_pending_for_recovery()
            .unwrap()
            .into_iter()
            .map(|s| s.result_id)
            .collect();
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);

        let bad = store.evaluation_status("bad").unwrap().unwrap();
        assert_eq!(bad.status, EvaluationStatus::Failed);
        assert_eq!(bad.performance_level, MANUAL_REVIEW_LABEL);
        assert!(bad.error.unwrap().contains("unreadable data"));

        // Not picked up again on the next poll
        assert_eq!(store.load_pending_for_recovery().unwrap().len(), 2);
    }

    #[test]
    fn test_recover_pending_skips_unreadable_row() {
        use crate::config::QueueConfig;
        use crate::daemon::recover_pending;
        use crate::domain::HIGHEST_PRIORITY;
        use crate::evaluator::MockEvaluator;
        use crate::queue::EvaluationQueue;
        use std::sync::Arc;

        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.persist_submission(&submission("good")).unwrap();
        insert_corrupt_row(&store, "bad");

        let queue = EvaluationQueue::new(QueueConfig::default(), store.clone(), Arc::new(MockEvaluator::new()));
        let actions = recover_pending(&queue, HIGHEST_PRIORITY).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].is_requeued());
        assert_eq!(queue.pending_snapshot().len(), 1);
    }

    #[test]
    fn test_reset_failed_flags_retry_request() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        store.persist_submission(&submission("r2")).unwrap();
        store.mark_failed("r1", "evaluator down").unwrap();
        assert!(store.take_retry_requests().unwrap().is_empty());

        store.reset_failed("r1").unwrap();
        let taken = store.take_retry_requests().unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].result_id, "r1");
        assert!(store.take_retry_requests().unwrap().is_empty());
    }

    #[test]
    fn test_retry_request_dropped_once_finished() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        store.mark_failed("r1", "evaluator down").unwrap();
        store.reset_failed("r1").unwrap();

        let breakdown = scoring::assemble(scoring::score_objective(&submission("r1")));
        store.write_evaluation_result("r1", &breakdown).unwrap();
        assert!(store.take_retry_requests().unwrap().is_empty());
    }

    #[test]
    fn test_pause_flag() {
        let (store, _temp) = create_test_store();
        assert!(!store.is_paused("exam-1").unwrap());
        store.set_paused("exam-1", true).unwrap();
        assert!(store.is_paused("exam-1").unwrap());
        store.set_paused("exam-1", false).unwrap();
        assert!(!store.is_paused("exam-1").unwrap());
    }

    #[test]
    fn test_status_counts() {
        let (store, _temp) = create_test_store();
        store.persist_submission(&submission("r1")).unwrap();
        store.persist_submission(&submission("r2")).unwrap();
        store.persist_submission(&submission("r3")).unwrap();
        store.mark_failed("r3", "x").unwrap();

        let counts = store.status_counts().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = SqliteStore::open_at(temp_dir.path()).unwrap();
            store.persist_submission(&submission("r1")).unwrap();
            store.set_paused("exam-1", true).unwrap();
        }
        let store = SqliteStore::open_at(temp_dir.path()).unwrap();
        assert_eq!(store.load_pending_for_recovery().unwrap().len(), 1);
        assert!(store.is_paused("exam-1").unwrap());
        assert_eq!(store.path(), Some(temp_dir.path().join(DB_FILE).as_path()));
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.persist_submission(&submission("r1")).unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.status_counts().unwrap().pending, 1);
    }
}

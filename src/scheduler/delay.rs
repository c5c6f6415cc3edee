//! Registry of delayed requeues.
//!
//! Every deferred re-push (short retry, escalated retry, pause recheck) is a
//! spawned timer tracked here by result id, so that it can be reported in
//! status queries and aborted on shutdown.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Why a task is waiting to be requeued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueKind {
    ShortRetry,
    LongRetry,
    PauseRecheck,
}

impl RequeueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequeueKind::ShortRetry => "short_retry",
            RequeueKind::LongRetry => "long_retry",
            RequeueKind::PauseRecheck => "pause_recheck",
        }
    }
}

#[derive(Debug)]
struct ScheduledRequeue {
    kind: RequeueKind,
    due_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Pending timers keyed by result id
#[derive(Debug, Default)]
pub struct DelayedRequeues {
    entries: HashMap<String, ScheduledRequeue>,
}

impl DelayedRequeues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a timer, aborting any earlier timer for the same id
    pub fn insert(&mut self, result_id: &str, kind: RequeueKind, due_at: DateTime<Utc>, handle: JoinHandle<()>) {
        if let Some(previous) = self.entries.insert(
            result_id.to_string(),
            ScheduledRequeue { kind, due_at, handle },
        ) {
            previous.handle.abort();
        }
    }

    /// Forget a timer that has fired; returns its kind
    pub fn complete(&mut self, result_id: &str) -> Option<RequeueKind> {
        self.entries.remove(result_id).map(|s| s.kind)
    }

    /// Abort a pending timer
    pub fn cancel(&mut self, result_id: &str) -> bool {
        match self.entries.remove(result_id) {
            Some(scheduled) => {
                scheduled.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every pending timer, returning how many there were
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, scheduled) in self.entries.drain() {
            scheduled.handle.abort();
        }
        count
    }

    pub fn contains(&self, result_id: &str) -> bool {
        self.entries.contains_key(result_id)
    }

    /// Kind and due time of a pending timer
    pub fn get(&self, result_id: &str) -> Option<(RequeueKind, DateTime<Utc>)> {
        self.entries.get(result_id).map(|s| (s.kind, s.due_at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pending timers of one kind
    pub fn count_kind(&self, kind: RequeueKind) -> usize {
        self.entries.values().filter(|s| s.kind == kind).count()
    }
}

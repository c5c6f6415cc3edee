//! Priority queue of pending evaluation tasks.
//!
//! Ordering key is `(priority, created_at, sequence)`:
//! - lower `priority` dispatches first (0 is the highest)
//! - ties break on enqueue time
//! - then on insertion order, so equal keys stay FIFO

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::domain::EvaluationTask;

#[derive(Debug)]
struct Entry {
    priority: i32,
    created_at: DateTime<Utc>,
    seq: u64,
    task: EvaluationTask,
}

impl Entry {
    fn key(&self) -> (i32, DateTime<Utc>, u64) {
        (self.priority, self.created_at, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reverse so the smallest key pops first
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Min-priority queue of tasks
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, O(log n)
    pub fn push(&mut self, task: EvaluationTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: task.priority,
            created_at: task.created_at,
            seq,
            task,
        });
    }

    /// Remove the task with the smallest key
    pub fn pop(&mut self) -> Option<EvaluationTask> {
        self.heap.pop().map(|e| e.task)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, result_id: &str) -> bool {
        self.heap.iter().any(|e| e.task.result_id() == result_id)
    }

    /// 1-based dispatch position of a queued task
    pub fn position(&self, result_id: &str) -> Option<usize> {
        let target = self.heap.iter().find(|e| e.task.result_id() == result_id)?;
        let ahead = self.heap.iter().filter(|e| e.key() < target.key()).count();
        Some(ahead + 1)
    }

    /// Queued tasks in dispatch order
    pub fn snapshot(&self) -> Vec<&EvaluationTask> {
        let mut entries: Vec<&Entry> = self.heap.iter().collect();
        entries.sort_by_key(|e| e.key());
        entries.into_iter().map(|e| &e.task).collect()
    }
}

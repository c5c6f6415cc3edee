//! Tick Loop - daemon main loop
//!
//! The daemon owns the queue for the lifetime of the process:
//! - recovers unfinished submissions at startup, ahead of new work
//! - starts the worker
//! - every tick, picks up admin retries and submissions persisted by other processes
//! - stops the worker when the shutdown future resolves

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::recovery::{RecoveryAction, recover_pending, recover_retry_requests};
use crate::domain::{DEFAULT_PRIORITY, HIGHEST_PRIORITY};
use crate::error::Result;
use crate::queue::EvaluationQueue;

/// Counters for one daemon run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickState {
    /// Number of ticks since start
    pub tick_count: u64,
    /// Submissions requeued by startup recovery
    pub recovered: usize,
    /// Submissions picked up by store polling
    pub picked_up: usize,
    /// Ticks whose store poll failed
    pub poll_errors: u64,
}

impl TickState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new tick
    pub fn tick(&mut self) {
        self.tick_count += 1;
    }
}

/// Run the queue until `shutdown` resolves, then stop it
pub async fn run_until_shutdown<F>(queue: EvaluationQueue, poll_interval: Duration, shutdown: F) -> Result<TickState>
where
    F: Future<Output = ()>,
{
    let mut state = TickState::new();

    let mut recovered = recover_retry_requests(&queue)?;
    recovered.extend(recover_pending(&queue, HIGHEST_PRIORITY)?);
    state.recovered = requeued(&recovered);

    queue.start();
    info!(
        recovered = state.recovered,
        poll_secs = poll_interval.as_secs(),
        "Daemon running"
    );

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and recovery just ran
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                state.tick();
                match poll_store(&queue) {
                    Ok(actions) => state.picked_up += requeued(&actions),
                    Err(e) => {
                        state.poll_errors += 1;
                        warn!(error = %e, "Store poll failed");
                    }
                }
            }
        }
    }

    info!(ticks = state.tick_count, picked_up = state.picked_up, "Shutting down daemon");
    queue.stop().await;
    Ok(state)
}

/// Admin retries first, then anything new
fn poll_store(queue: &EvaluationQueue) -> Result<Vec<RecoveryAction>> {
    let mut actions = recover_retry_requests(queue)?;
    actions.extend(recover_pending(queue, DEFAULT_PRIORITY)?);
    Ok(actions)
}

fn requeued(actions: &[RecoveryAction]) -> usize {
    actions.iter().filter(|a| a.is_requeued()).count()
}

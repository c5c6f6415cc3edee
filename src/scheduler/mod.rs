//! Scheduling primitives for the evaluation queue.
//!
//! - **PriorityQueue**: orders pending tasks by `(priority, created_at, sequence)`
//! - **RateLimiter**: spaces evaluator calls and backs off on quota errors
//! - **RetryPolicy**: two-tier retry state machine
//! - **DelayedRequeues**: tracked, cancellable deferred re-pushes

mod delay;
mod priority;
mod rate_limit;
mod retry;

pub use delay::{DelayedRequeues, RequeueKind};
pub use priority::PriorityQueue;
pub use rate_limit::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};

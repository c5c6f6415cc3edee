//! evalq - background exam evaluation queue
//!
//! Scores exam submissions off the request path: objective questions are
//! marked locally, free-text answers go to a rate-limited LLM evaluator, and
//! failures move through short retries, long-interval escalation and finally
//! manual review. Everything unfinished is recovered from the durable store
//! on restart.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod id;
pub mod queue;
pub mod scheduler;
pub mod scoring;
pub mod store;

pub use error::{EvalqError, Result};

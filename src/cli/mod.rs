//! CLI module for evalq - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the worker,
//! submitting answers, and admin controls over stored evaluations.

pub mod commands;

pub use commands::Cli;

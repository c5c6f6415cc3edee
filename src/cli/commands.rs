//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: run the evaluation daemon in the foreground
//! - submit: persist a submission for evaluation
//! - status / stats: inspect stored evaluations
//! - pause / resume / retry: admin controls

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// evalq - background exam evaluation queue
#[derive(Parser, Debug)]
#[command(name = "evalq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the evaluation worker until interrupted
    Run,

    /// Submit answers from a JSON file for evaluation
    Submit {
        /// Path to the submission JSON
        file: PathBuf,
    },

    /// Show the stored evaluation status of a result
    Status {
        /// Result ID to check
        result_id: String,

        /// Print the full record as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show counts of stored evaluations per status
    Stats,

    /// Pause evaluation for an exam
    Pause {
        /// Exam ID to pause
        exam_id: String,
    },

    /// Resume evaluation for an exam
    Resume {
        /// Exam ID to resume
        exam_id: String,
    },

    /// Move a failed evaluation back to pending
    Retry {
        /// Result ID to retry
        result_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["evalq"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["evalq", "-v", "stats"]).unwrap();
        assert!(cli.is_verbose());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["evalq", "run", "-c", "/path/to/evalq.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/evalq.yml")));
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn test_submit_command() {
        let cli = Cli::try_parse_from(["evalq", "submit", "answers.json"]).unwrap();
        match cli.command {
            Commands::Submit { file } => assert_eq!(file, PathBuf::from("answers.json")),
            _ => panic!("Expected submit command"),
        }
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::try_parse_from(["evalq", "status", "res-1"]).unwrap();
        match cli.command {
            Commands::Status { result_id, json } => {
                assert_eq!(result_id, "res-1");
                assert!(!json);
            }
            _ => panic!("Expected status command"),
        }
    }

    #[test]
    fn test_status_json() {
        let cli = Cli::try_parse_from(["evalq", "status", "res-1", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true, .. }));
    }

    #[test]
    fn test_pause_and_resume() {
        let cli = Cli::try_parse_from(["evalq", "pause", "exam-9"]).unwrap();
        assert!(matches!(cli.command, Commands::Pause { ref exam_id } if exam_id == "exam-9"));

        let cli = Cli::try_parse_from(["evalq", "resume", "exam-9"]).unwrap();
        assert!(matches!(cli.command, Commands::Resume { ref exam_id } if exam_id == "exam-9"));
    }

    #[test]
    fn test_retry_command() {
        let cli = Cli::try_parse_from(["evalq", "retry", "res-7"]).unwrap();
        match cli.command {
            Commands::Retry { result_id } => assert_eq!(result_id, "res-7"),
            _ => panic!("Expected retry command"),
        }
    }

    #[test]
    fn test_help_works() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version_flag() {
        // Version flag causes early exit with error (expected)
        assert!(Cli::try_parse_from(["evalq", "--version"]).is_err());
    }
}

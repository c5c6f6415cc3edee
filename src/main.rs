use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use evalq::config::Config;
use evalq::daemon::run_until_shutdown;
use evalq::domain::{EvaluationStatus, Submission};
use evalq::evaluator::GroqEvaluator;
use evalq::queue::EvaluationQueue;
use evalq::store::{DurableStore, SqliteStore};

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evalq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("evalq.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins; otherwise the configured level
    let fallback = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(fallback))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open_at(&config.storage.data_dir)
        .context(format!("Failed to open store in {}", config.storage.data_dir.display()))?;
    Ok(Arc::new(store))
}

fn colored_status(status: EvaluationStatus) -> ColoredString {
    match status {
        EvaluationStatus::Completed => status.as_str().green(),
        EvaluationStatus::Failed => status.as_str().red(),
        EvaluationStatus::Processing => status.as_str().cyan(),
        EvaluationStatus::Pending | EvaluationStatus::Partial => status.as_str().yellow(),
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run => handle_run_command(config).await,
        Commands::Submit { file } => handle_submit_command(file, config),
        Commands::Status { result_id, json } => handle_status_command(result_id, *json, config),
        Commands::Stats => handle_stats_command(config),
        Commands::Pause { exam_id } => handle_pause_command(exam_id, true, config),
        Commands::Resume { exam_id } => handle_pause_command(exam_id, false, config),
        Commands::Retry { result_id } => handle_retry_command(result_id, config),
    }
}

async fn handle_run_command(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let evaluator = GroqEvaluator::from_env(
        &config.evaluator.api_key_env,
        config.evaluator.backup_api_key_env.as_deref(),
        config.evaluator.groq_config(),
    )
    .context("Failed to create evaluator")?;

    let queue = EvaluationQueue::new(config.queue.clone(), store, Arc::new(evaluator));
    queue.on_complete(|result_id, breakdown| {
        println!(
            "{} {} ({:.1}%, {})",
            "Evaluated:".green(),
            result_id,
            breakdown.percentage,
            breakdown.performance_level.as_str()
        );
    });
    queue.on_error(|result_id, message| {
        println!("{} {} - {}", "Failed:".red(), result_id, message);
    });

    println!(
        "{} rate limit {}, press Ctrl-C to stop",
        "Running evaluation worker:".cyan(),
        queue.get_queue_stats().rate_limit
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    let state = run_until_shutdown(queue, config.queue.store_poll_interval(), shutdown)
        .await
        .context("Daemon failed")?;

    println!(
        "{} recovered {}, picked up {}",
        "Stopped:".yellow(),
        state.recovered,
        state.picked_up
    );
    Ok(())
}

fn handle_submit_command(file: &Path, config: &Config) -> Result<()> {
    info!("Submitting answers from {}", file.display());
    let content = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;
    let submission: Submission = serde_json::from_str(&content).context("Failed to parse submission")?;
    if submission.questions.is_empty() {
        bail!("Submission has no questions");
    }

    let store = open_store(config)?;
    let result_id = store.persist_submission(&submission).context("Failed to persist submission")?;
    println!("{} {}", "Submitted:".green(), result_id);
    Ok(())
}

fn handle_status_command(result_id: &str, json: bool, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let Some(stored) = store.evaluation_status(result_id)? else {
        bail!("Result not found: {}", result_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }

    println!("{} {}", "Result:".green(), stored.result_id);
    println!("  Candidate: {} ({})", stored.candidate_name, stored.candidate_id);
    println!("  Exam:      {}", stored.exam_id);
    println!("  Status:    {}", colored_status(stored.status));
    if stored.status == EvaluationStatus::Completed {
        println!(
            "  Score:     {:.2}/{:.2} ({:.1}%)",
            stored.obtained_marks, stored.total_marks, stored.percentage
        );
    }
    println!("  Level:     {}", stored.performance_level);
    if let Some(error) = &stored.error {
        println!("  Error:     {}", error.red());
    }
    Ok(())
}

fn handle_stats_command(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let counts = store.status_counts()?;
    println!("{}", "Stored evaluations:".cyan());
    println!("  {:<11} {}", colored_status(EvaluationStatus::Pending), counts.pending);
    println!("  {:<11} {}", colored_status(EvaluationStatus::Processing), counts.processing);
    println!("  {:<11} {}", colored_status(EvaluationStatus::Completed), counts.completed);
    println!("  {:<11} {}", colored_status(EvaluationStatus::Failed), counts.failed);
    println!("  {:<11} {}", "total", counts.total());
    Ok(())
}

fn handle_pause_command(exam_id: &str, paused: bool, config: &Config) -> Result<()> {
    info!("Setting paused={} for exam {}", paused, exam_id);
    let store = open_store(config)?;
    store.set_paused(exam_id, paused)?;
    if paused {
        println!("{} {}", "Paused:".yellow(), exam_id);
    } else {
        println!("{} {}", "Resumed:".green(), exam_id);
    }
    Ok(())
}

fn handle_retry_command(result_id: &str, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    match store.reset_failed(result_id)? {
        Some(submission) => {
            println!(
                "{} {} ({}), the running worker will pick it up",
                "Re-queued:".green(),
                result_id,
                submission.candidate_name
            );
            Ok(())
        }
        None => match store.evaluation_status(result_id)? {
            None => bail!("Result not found: {}", result_id),
            Some(stored) => bail!("{} is {}, only failed evaluations can be retried", result_id, stored.status),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

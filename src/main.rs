//! Subflow - bilingual subtitles for video files
//!
//! Command line front end: loads the configuration, wires the default
//! collaborators into the workflow and reports run results.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subflow::batch::{default_output_path, discover_videos, BatchRunner};
use subflow::cache::ArtifactCache;
use subflow::cli::{Args, CacheAction, Commands, PipelineOverrides};
use subflow::config::Config;
use subflow::device;
use subflow::error::SubflowError;
use subflow::stages::Collaborators;
use subflow::state::RunStatus;
use subflow::workflow::{RunResult, Workflow, WorkflowEvent};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    setup_logging(args.verbose, &config.log_level)?;
    info!("Starting Subflow");

    match args.command {
        Commands::Process { input, output, overrides } => {
            let config = prepare_config(config, &overrides)?;
            let workflow = build_workflow(&config).await?;
            let output = output.unwrap_or_else(|| default_output_path(&input));

            let progress = ProgressBar::new_spinner();
            progress.enable_steady_tick(Duration::from_millis(120));
            let listener = follow_events(&workflow, progress.clone());

            let result = workflow.run(&input, &output, Arc::new(config)).await;

            listener.abort();
            progress.finish_and_clear();
            print_result(&result);

            if result.status == RunStatus::Failed {
                std::process::exit(1);
            }
        }
        Commands::Batch { input_dir, output_dir, recursive, workers, overrides } => {
            let mut config = prepare_config(config, &overrides)?;
            if let Some(workers) = workers {
                config.batch.workers = workers;
                config.validate()?;
            }

            if !input_dir.is_dir() {
                return Err(SubflowError::Config(format!("{} is not a directory", input_dir.display())).into());
            }
            let inputs = discover_videos(&input_dir, recursive);
            if inputs.is_empty() {
                println!("No video files found in {}", input_dir.display());
                return Ok(());
            }
            info!("Found {} video files to process", inputs.len());

            let output_dir = output_dir.unwrap_or_else(|| input_dir.clone());
            tokio::fs::create_dir_all(&output_dir).await?;

            let workflow = Arc::new(build_workflow(&config).await?);
            let progress = ProgressBar::new(inputs.len() as u64);
            progress.set_style(
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            let listener = follow_events(&workflow, progress.clone());

            let runner = BatchRunner::new(workflow, Arc::new(config));
            let cancel = runner.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing running stages before stopping");
                    cancel.cancel();
                }
            });

            let report = runner.run_batch(&inputs, &output_dir).await;

            listener.abort();
            progress.finish_and_clear();

            let cwd = std::env::current_dir().unwrap_or_default();
            println!("\n{:<10} {:<50} {}", "Status", "Input", "Detail");
            println!("{}", "-".repeat(100));
            for result in &report.results {
                let shown = pathdiff::diff_paths(&result.input_path, &cwd).unwrap_or_else(|| result.input_path.clone());
                let detail = match (&result.error, &result.output_path) {
                    (Some(err), _) if result.status == RunStatus::Failed => {
                        format!("{} [{}]: {}", err.stage, err.kind, err.message)
                    }
                    (_, Some(output)) => output.display().to_string(),
                    _ => String::new(),
                };
                println!("{:<10} {:<50} {}", result.status.to_string(), shown.display(), detail);
            }
            println!(
                "\n{} succeeded, {} partial, {} failed in {}",
                report.summary.succeeded,
                report.summary.partial,
                report.summary.failed,
                format_duration(report.elapsed.as_secs())
            );

            if report.summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Cache { action } => {
            let cache = ArtifactCache::on_disk(&config.cache.directory)?;

            match action {
                CacheAction::List => {
                    let entries = cache.list().await?;
                    if entries.is_empty() {
                        println!("No cached artifacts found.");
                    } else {
                        println!("\nCached Artifacts:");
                        println!("{:<20} {:<18} {:<12} {:<10}", "Stage", "Entry", "Cached", "Size");
                        println!("{}", "-".repeat(65));

                        let now = chrono::Utc::now();
                        for entry in entries {
                            let cached_ago = (now - entry.created_at).num_seconds().max(0) as u64;
                            println!(
                                "{:<20} {:<18} {:<12} {:<10}",
                                entry.stage,
                                &entry.id[..16],
                                format_duration(cached_ago),
                                format_size(entry.size)
                            );
                        }
                    }
                }
                CacheAction::Info => {
                    let info = cache.info().await?;
                    println!("\nCache Information:");
                    println!("Location: {}", config.cache.directory.display());
                    println!("Entries: {}", info.total_entries);
                    println!("Total size: {}", format_size(info.total_size));
                    if let Some(oldest) = info.oldest_entry {
                        println!("Oldest entry: {}", oldest.format("%Y-%m-%d %H:%M:%S"));
                    }
                    if let Some(newest) = info.newest_entry {
                        println!("Newest entry: {}", newest.format("%Y-%m-%d %H:%M:%S"));
                    }
                    if !info.stages.is_empty() {
                        println!("Stages: {}", info.stages.join(", "));
                    }
                }
                CacheAction::Clear => {
                    let deleted_count = cache.clear().await?;
                    println!("Cleared {} cached artifacts", deleted_count);
                }
                CacheAction::Clean { days } => {
                    let deleted_count = cache.clean_older_than(days).await?;
                    println!("Removed {} cached artifacts older than {} days", deleted_count, days);
                }
            }
        }
        Commands::Workflow { overrides } => {
            let config = prepare_config(config, &overrides)?;
            let collaborators = Collaborators::from_config(&config, config.device)?;
            let workflow = Workflow::with_default_stages(&collaborators, Arc::new(ArtifactCache::disabled()));

            println!("\n{:<3} {:<18} {:<10} {:<8} {:<48} {}", "#", "Stage", "Kind", "Runs", "Gate", "Writes");
            println!("{}", "-".repeat(110));
            for row in workflow.describe(&config) {
                println!(
                    "{:<3} {:<18} {:<10} {:<8} {:<48} {}",
                    row.position,
                    row.name,
                    format!("{:?}", row.requirement).to_lowercase(),
                    if row.enabled { "yes" } else { "no" },
                    row.gate,
                    row.writes
                );
            }
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(SubflowError::Config(format!(
                    "{} already exists, use --force to overwrite",
                    output.display()
                ))
                .into());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => Config::from_file(config_path)?,
        // Pick up config.toml from the current directory
        None if Path::new("config.toml").exists() => Config::from_file("config.toml")?,
        None => Config::default(),
    };
    Ok(config)
}

/// Apply CLI overrides and resolve the processing device into the snapshot.
fn prepare_config(mut config: Config, overrides: &PipelineOverrides) -> Result<Config> {
    overrides.apply(&mut config)?;
    config.device = device::resolve(config.device);
    Ok(config)
}

async fn build_workflow(config: &Config) -> Result<Workflow> {
    let collaborators = Collaborators::from_config(config, config.device)?;

    // Fail early on missing tools rather than inside the first stage
    collaborators.media.check_availability().await?;
    info!("Using {}", collaborators.media.version_info().await?);
    collaborators.transcriber.check_availability().await?;
    if let Err(e) = collaborators.translator.check_availability().await {
        warn!("Translator check failed: {}", e);
    }
    if config.features.enable_tts {
        collaborators.synthesizer.check_availability().await?;
    }

    let cache = Arc::new(ArtifactCache::from_config(&config.cache)?);
    Ok(Workflow::with_default_stages(&collaborators, cache))
}

/// Mirror workflow events onto a progress bar until aborted.
fn follow_events(workflow: &Workflow, progress: ProgressBar) -> JoinHandle<()> {
    let mut events = workflow.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkflowEvent::StageStarted { stage, .. }) => progress.set_message(stage),
                Ok(WorkflowEvent::StageRetrying { stage, attempt, .. }) => {
                    progress.set_message(format!("{} (attempt {})", stage, attempt));
                }
                Ok(WorkflowEvent::RunFinished { .. }) => progress.inc(1),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_result(result: &RunResult) {
    println!("\nStatus: {}", result.status);
    if let Some(output) = &result.output_path {
        println!("Output: {}", output.display());
    }
    if let Some(err) = &result.error {
        println!(
            "{} {} [{}] after {} attempt(s): {}",
            if result.status == RunStatus::Failed { "Failed at" } else { "Degraded at" },
            err.stage,
            err.kind,
            err.attempts,
            err.message
        );
    }
    println!("\nStages:");
    for record in &result.history {
        println!("  {:<18} {:?}", record.stage, record.outcome);
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool, configured_level: &str) -> Result<()> {
    let log_dir: PathBuf = std::env::current_dir()?.join(".subflow").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "subflow.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose {
        Level::DEBUG
    } else {
        configured_level.parse::<Level>().unwrap_or(Level::INFO)
    };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("subflow.log").display()
    );

    Ok(())
}

/// Format duration in seconds to human readable string
fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86_400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86_400, (seconds % 86_400) / 3600)
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

// src/main.rs

use anyhow::{bail, Context, Result};
use artifact_monitor::events;
use artifact_monitor::prelude::*;
use artifact_monitor::sampler::format_size;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "artifact-monitor",
    version,
    about = "Follow CI artifact downloads executed by the artifact server"
)]
struct Cli {
    /// Overrides the configured API base URL.
    #[arg(long, global = true)]
    api: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a download and follow it to completion.
    Download {
        #[arg(long)]
        pipeline: u64,
        /// Artifact path to fetch; repeat for several.
        #[arg(long = "artifact", required = true)]
        artifacts: Vec<String>,
        #[arg(long)]
        download_path: String,
    },
    /// Attach to a job that is already running on the server.
    Watch {
        job_id: String,
        #[arg(long, default_value_t = 0)]
        pipeline: u64,
    },
    /// Show the download history.
    History {
        #[arg(long)]
        clear: bool,
    },
}

enum Source {
    Start(DownloadRequest),
    Attach { job_id: String, pipeline_id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut settings = Settings::new().context("failed to load configuration")?;
    if let Some(api) = cli.api {
        settings.api_base_url = api;
    }

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .init();

    let history = HistoryStore::open(&settings.history_db, settings.history_limit)
        .await
        .context("failed to open download history")?;

    match cli.command {
        Command::History { clear } => show_history(&history, clear).await,
        Command::Download {
            pipeline,
            artifacts,
            download_path,
        } => {
            let request = DownloadRequest::new(pipeline, artifacts, download_path);
            follow(&settings, &history, Source::Start(request)).await
        }
        Command::Watch { job_id, pipeline } => {
            let source = Source::Attach {
                job_id,
                pipeline_id: pipeline,
            };
            follow(&settings, &history, source).await
        }
    }
}

async fn follow(settings: &Settings, history: &HistoryStore, source: Source) -> Result<()> {
    let api: Arc<dyn ArtifactApi> = Arc::new(HttpArtifactClient::new(&settings.api_base_url)?);

    let shutdown = CancellationToken::new();
    let checker = HealthChecker::new(api.clone(), settings.health_interval());
    let health = checker.signal();
    let health_task = tokio::spawn(checker.run(shutdown.clone()));

    let (tx, mut rx) = events::channel();
    let registry = MonitorRegistry::new(api, health, tx, settings.monitor_config());

    let (job_id, pipeline_id, requested) = match source {
        Source::Start(request) => {
            let pipeline_id = request.pipeline_id;
            let requested = request.artifact_paths.clone();
            let started = registry.start(request).await?;
            match &started.warning {
                Some(warning) => println!("[WARN] {warning}"),
                None => println!("Download started successfully (job {})", started.job_id),
            }
            (started.job_id, pipeline_id, requested)
        }
        Source::Attach {
            job_id,
            pipeline_id,
        } => {
            registry.track(&job_id, pipeline_id, Vec::new()).await?;
            (job_id, pipeline_id, Vec::new())
        }
    };

    println!("Commands: p = pause, r = resume, c = cancel");
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let final_state = loop {
        tokio::select! {
            line = commands.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => run_command(&registry, &job_id, line.trim()).await,
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { break None };
                if event.job_id() != job_id {
                    continue;
                }
                if let MonitorEvent::Finished { state, summary, fatal, .. } = &event {
                    print_summary(summary, fatal.as_deref());
                    let entry = HistoryEntry::from_summary(pipeline_id, &job_id, *state, &requested, summary);
                    if let Err(e) = history.record(&entry).await {
                        warn!(error = %e, "failed to save download history");
                    }
                    registry.acknowledge(&job_id).await?;
                    break Some(*state);
                }
                print_event(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, cancelling active downloads");
                registry.cancel_all().await;
            }
        }
    };

    registry.shutdown().await;
    shutdown.cancel();
    let _ = health_task.await;

    match final_state {
        Some(JobState::Completed) => Ok(()),
        Some(state) => bail!("download ended as {}", state.label()),
        None => bail!("event stream closed before the download finished"),
    }
}

async fn run_command(registry: &MonitorRegistry, job_id: &str, command: &str) {
    let result = match command {
        "p" | "pause" => registry.pause(job_id).await,
        "r" | "resume" => registry.resume(job_id).await,
        "c" | "cancel" => registry.cancel(job_id).await,
        "" => return,
        other => {
            println!("Unknown command: {other}");
            return;
        }
    };
    // Rejections are reported through the event stream as well.
    if let Err(e) = result {
        warn!(job_id, error = %e, "command failed");
    }
}

fn print_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Progress(s) => {
            let percent = s
                .percent
                .map_or_else(|| "--".to_string(), |p| format!("{p:.1}%"));
            let file = s.current_file.as_deref().unwrap_or("Initializing...");
            println!(
                "[{}] {percent} {} | Speed: {} | Time remaining: {} | {file}",
                s.state.label(),
                s.size,
                s.speed,
                s.eta
            );
        }
        MonitorEvent::TransientError { message, .. }
        | MonitorEvent::Retrying { message, .. }
        | MonitorEvent::Stalled { message, .. }
        | MonitorEvent::ServerUnreachable { message, .. } => println!("[WARN] {message}"),
        MonitorEvent::CommandRejected { command, reason, .. } => {
            println!("[ERROR] Failed to {command} download: {reason}")
        }
        MonitorEvent::ControlChanged { control_state, .. } => {
            println!("[INFO] Control state is now {control_state:?}")
        }
        MonitorEvent::WarningCleared { .. } | MonitorEvent::Finished { .. } => {}
    }
}

fn print_summary(summary: &CompletionSummary, fatal: Option<&str>) {
    println!("\n== {} ==", summary.title());
    if let Some(fatal) = fatal {
        println!("{fatal}");
    }
    if !summary.downloaded_files.is_empty() {
        println!("Successfully Downloaded Files:");
        for file in &summary.downloaded_files {
            println!("  [ok] {} ({})", file.name, format_size(file.size));
        }
    }
    if !summary.missing_files.is_empty() {
        println!("Failed Downloads:");
        for file in &summary.missing_files {
            println!("  [x] {file}");
        }
    }
    println!("Total Files Attempted: {}", summary.total_files);
    println!("Successfully Downloaded: {}", summary.downloaded_files.len());
    println!("Failed Downloads: {}", summary.missing_files.len());
    println!("Total Download Size: {}", format_size(summary.total_size));
}

async fn show_history(history: &HistoryStore, clear: bool) -> Result<()> {
    if clear {
        history.clear().await?;
        println!("Download history cleared successfully");
        return Ok(());
    }
    let entries = history.list().await?;
    if entries.is_empty() {
        println!("No download history");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  pipeline #{:<8} {:<18} {:>10}  {}",
            entry.downloaded_at.format("%Y-%m-%d %H:%M"),
            entry.pipeline_id,
            entry.status.label(),
            format_size(entry.size),
            entry.artifacts.join(", ")
        );
    }
    Ok(())
}

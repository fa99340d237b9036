//! `secondbrain` batch entry point.
//!
//! # Responsibility
//! - Load settings, initialize logging and wire the local adapters.
//! - Run one batch (or one phase of it) and exit.
//!
//! Scheduling is external; every invocation runs to completion.

use clap::{Parser, Subcommand};
use log::error;
use secondbrain_core::{
    init_logging, load_settings, AuditLog, ChatDbTransport, CommandClassifier, CycleReport,
    FsItemStore, OsascriptSender, Pipeline, PipelineError, Settings,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const CONFIG_DIR_ENV: &str = "SECONDBRAIN_CONFIG_DIR";

#[derive(Parser)]
#[command(name = "secondbrain")]
#[command(about = "Capture, classify and file messages into a notes vault", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.yaml and config.local.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Do not mirror log records to stderr
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new messages, then route, correct and notify
    Run,
    /// Ingest new messages only
    Capture,
    /// Route pending items, apply corrections and send notifications
    Process,
    /// Send pending confirmations and feedback requests only
    Notify,
    /// Summarize the audit trail
    Audit {
        /// Number of days to include
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_dir = cli
        .config
        .or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let settings = match load_settings(&config_dir) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("secondbrain: {err}");
            return ExitCode::from(2);
        }
    };

    let level = cli
        .log_level
        .unwrap_or_else(|| settings.logging.level.clone());
    let log_dir = absolute(&settings.log_dir());
    if let Err(err) = init_logging(&level, &log_dir, !cli.quiet) {
        eprintln!("secondbrain: logging disabled: {err}");
    }

    match cli.command {
        Commands::Audit { days } => {
            match AuditLog::new(&settings.paths.audit_dir).summarize(days) {
                Ok(summary) => {
                    println!("{summary}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("secondbrain: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        command => report(run_batch(&settings, &command)),
    }
}

fn run_batch(settings: &Settings, command: &Commands) -> Result<CycleReport, PipelineError> {
    let store = FsItemStore::new(settings);
    let transport = ChatDbTransport::new(settings.paths.chat_db.clone(), settings.handles.clone());
    let sender = OsascriptSender::new(settings.feedback.send_timeout());
    let classifier = CommandClassifier::from_settings(&settings.classifier);
    let pipeline = Pipeline::new(settings, &store, &transport, &sender, &classifier);

    match command {
        Commands::Run => pipeline.run_cycle(),
        Commands::Capture => pipeline.ingest_only(),
        Commands::Process => pipeline.process_only(),
        Commands::Notify => pipeline.notify_only(),
        Commands::Audit { .. } => Ok(CycleReport::default()),
    }
}

fn report(result: Result<CycleReport, PipelineError>) -> ExitCode {
    match result {
        Ok(cycle) => {
            if let Some(ingest) = &cycle.ingest {
                println!("ingest: fetched={} {}", ingest.fetched, ingest.summary);
            }
            println!("process: {}", cycle.summary);
            for phase_error in &cycle.phase_errors {
                eprintln!("secondbrain: {phase_error}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cycle_done module=cli status=error error={err}");
            eprintln!("secondbrain: {err}");
            ExitCode::FAILURE
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

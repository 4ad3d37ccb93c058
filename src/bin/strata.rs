//! # Strata CLI - Full and incremental directory backups
//!
//! Command-line interface for the Strata backup library.
//!
//! ## Usage
//! ```bash
//! # Complete copy of ./project into a new instance under ./backups
//! strata backup full ./project ./backups
//!
//! # Only what changed since the newest full backup
//! strata backup incremental ./project ./backups
//!
//! # List instances
//! strata list ./backups
//!
//! # Restore an instance (incrementals are laid over their base)
//! strata restore ./backups/2024-05-01_10-00-00 ./restored
//!
//! # Compare a restore with the original tree
//! strata verify ./project ./restored
//! ```
//!
//! Ctrl-C or SIGTERM cancels the running operation; a partially written
//! backup is removed before the process exits.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata::{
    BackupKind, BackupReport, CancellationToken, Strata, StrataBuilder, StrataError,
    TreeVerifier,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Strata CLI - Full and incremental backups of a directory tree
#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Full and incremental directory backups with tombstone-based restore")]
#[command(long_about = None)]
struct Cli {
    /// Answer every confirmation with "yes"
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show a progress spinner
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Create a backup
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Restore a backup instance into a directory
    #[command(alias = "rs")]
    Restore {
        /// Backup instance directory
        backup_dir: PathBuf,

        /// Directory to restore into
        target: PathBuf,
    },

    /// List backup instances
    #[command(alias = "ls")]
    List {
        /// Backup root directory
        backup_root: PathBuf,
    },

    /// Compare two directory trees
    Verify {
        /// Tree taken as the reference
        expected: PathBuf,

        /// Tree being checked
        actual: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
enum BackupCommand {
    /// Complete copy of the source
    Full {
        /// Directory to back up
        source: PathBuf,

        /// Directory holding backup instances
        backup_root: PathBuf,
    },

    /// Changes since the newest full backup
    #[command(alias = "inc")]
    Incremental {
        /// Directory to back up
        source: PathBuf,

        /// Directory holding backup instances
        backup_root: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        std::process::exit(report_error(&e));
    }
}

/// Print an error and pick the exit code
fn report_error(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StrataError>() {
        Some(e) if e.is_aborted() => {
            eprintln!("{}: {}", "Aborted".yellow().bold(), e.user_message());
            1
        }
        Some(e) if e.is_cancelled() => {
            eprintln!("{}: {}", "Cancelled".yellow().bold(), e.user_message());
            130
        }
        Some(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
            1
        }
        None => {
            eprintln!("{}: {:#}", "Error".red().bold(), error);
            1
        }
    }
}

/// Run the command on a blocking thread until it finishes or a signal arrives
async fn run(cli: Cli) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let spinner = cli.progress.then(create_spinner);
    let strata = open_strata(cli.yes, &token, spinner.clone())?;

    let command = cli.command.clone();
    let worker_token = token.clone();
    let worker_spinner = spinner.clone();
    let mut handle = tokio::task::spawn_blocking(move || {
        execute(command, &strata, &worker_token, worker_spinner.as_ref())
    });

    let result = tokio::select! {
        joined = &mut handle => joined,
        signal = wait_for_signal() => {
            info!("Received {}, cancelling", signal);
            if let Some(pb) = &spinner {
                pb.suspend(|| eprintln!("{}", "Shutting down gracefully...".yellow()));
            } else {
                eprintln!("{}", "Shutting down gracefully...".yellow());
            }
            token.cancel();
            handle.await
        }
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result.context("operation thread panicked")?
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Build the engine, asking on the terminal unless `--yes` was given
fn open_strata(
    yes: bool,
    token: &CancellationToken,
    spinner: Option<ProgressBar>,
) -> anyhow::Result<Strata> {
    let prompt_spinner = spinner.clone();
    let mut builder = StrataBuilder::new()
        .assume_yes(yes)
        .cancellation_token(token.clone())
        .confirmer(move |message: &str| {
            let ask = || {
                dialoguer::Confirm::new()
                    .with_prompt(message)
                    .default(false)
                    .interact()
                    .unwrap_or(false)
            };
            match &prompt_spinner {
                Some(pb) => pb.suspend(ask),
                None => ask(),
            }
        });

    if let Some(pb) = spinner {
        builder = builder.progress_callback(move |info| {
            if let Some(item) = &info.current_item {
                pb.set_message(format!("{} {}", info.operation, item.display()));
            }
        });
    }

    Ok(builder.build()?)
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Main command runner
fn execute(
    command: Commands,
    strata: &Strata,
    token: &CancellationToken,
    spinner: Option<&ProgressBar>,
) -> anyhow::Result<()> {
    match command {
        Commands::Backup(BackupCommand::Full {
            source,
            backup_root,
        }) => cmd_backup(strata, BackupKind::Full, &source, &backup_root, spinner),
        Commands::Backup(BackupCommand::Incremental {
            source,
            backup_root,
        }) => cmd_backup(strata, BackupKind::Incremental, &source, &backup_root, spinner),
        Commands::Restore { backup_dir, target } => {
            cmd_restore(strata, &backup_dir, &target, spinner)
        }
        Commands::List { backup_root } => cmd_list(strata, &backup_root),
        Commands::Verify { expected, actual } => cmd_verify(token, &expected, &actual),
    }
}

/// Create a full or incremental backup
fn cmd_backup(
    strata: &Strata,
    kind: BackupKind,
    source: &Path,
    backup_root: &Path,
    spinner: Option<&ProgressBar>,
) -> anyhow::Result<()> {
    println!(
        "{} {}",
        format!("Creating {} backup of", kind).blue().bold(),
        source.display()
    );

    let report: BackupReport = match kind {
        BackupKind::Full => strata.full_backup(source, backup_root)?,
        BackupKind::Incremental => strata.incremental_backup(source, backup_root)?,
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    println!(
        "{} Created {} backup {}",
        "✓".green().bold(),
        kind,
        report.name.yellow().bold()
    );
    if let Some(base) = &report.base {
        println!("  Base: {}", base.cyan());
    }
    println!("  Files: {}", report.stats.files_copied.to_string().cyan());
    if kind == BackupKind::Incremental {
        println!("  Deleted: {}", report.stats.tombstones.to_string().yellow());
    }
    println!(
        "  Size: {}",
        strata::utils::format_bytes(report.stats.bytes_copied).cyan()
    );
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms))
            .to_string()
            .cyan()
    );
    Ok(())
}

/// Restore a backup instance
fn cmd_restore(
    strata: &Strata,
    backup_dir: &Path,
    target: &Path,
    spinner: Option<&ProgressBar>,
) -> anyhow::Result<()> {
    println!(
        "{} {} {} {}",
        "Restoring".blue().bold(),
        backup_dir.display(),
        "into".blue().bold(),
        target.display()
    );

    let result = strata.restore(backup_dir, target)?;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    println!("{} Restoration complete", "✓".green().bold());
    if let Some(base) = &result.base {
        println!("  Base: {}", base.display().to_string().cyan());
    }
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    println!("  Paths removed: {}", result.paths_removed.to_string().yellow());
    println!(
        "  Bytes written: {}",
        strata::utils::format_bytes(result.bytes_written).cyan()
    );
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms))
            .to_string()
            .cyan()
    );

    if !result.warnings.is_empty() {
        println!("\n{}", "Warnings:".yellow().bold());
        for warning in &result.warnings {
            println!("  - {}", warning.yellow());
        }
    }
    Ok(())
}

/// List backup instances, oldest first
fn cmd_list(strata: &Strata, backup_root: &Path) -> anyhow::Result<()> {
    let instances = strata.list_backups(backup_root)?;

    if instances.is_empty() {
        println!("{}", "No backups found.".yellow());
        return Ok(());
    }

    println!("{}", "Backups:".blue().bold());
    println!();
    for instance in &instances {
        match &instance.info {
            Some(info) if info.kind == BackupKind::Full => {
                println!("  {} {}", instance.name.yellow(), "full".green());
            }
            Some(info) => println!(
                "  {} {} {} {}",
                instance.name.yellow(),
                "incremental".cyan(),
                "base".dimmed(),
                info.base.as_deref().unwrap_or("?")
            ),
            None => println!("  {} {}", instance.name.yellow(), "incomplete".red()),
        }
    }
    Ok(())
}

/// Compare two trees
fn cmd_verify(token: &CancellationToken, expected: &Path, actual: &Path) -> anyhow::Result<()> {
    let report = TreeVerifier::new()
        .with_cancellation(token.clone())
        .verify(expected, actual)?;

    if report.is_valid() {
        println!("{} {}", "✓".green().bold(), report.summary());
        return Ok(());
    }

    println!("{} {}", "✗".red().bold(), report.summary());
    for path in &report.missing {
        println!("  {} {}", "missing".red(), path.display());
    }
    for path in &report.unexpected {
        println!("  {} {}", "unexpected".yellow(), path.display());
    }
    for mismatch in &report.mismatched {
        println!("  {} {}", "differs".yellow(), mismatch.path.display());
    }
    anyhow::bail!("trees differ")
}

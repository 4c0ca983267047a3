//! delta-backup - command-line entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use delta_backup::restore::BackupNode;
use delta_backup::daemon::shutdown::ShutdownCoordinator;
use delta_backup::{utils, BackupService, Confirmation, Config, PassStatus};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one backup pass
    Run {
        #[arg(short, long)]
        source: PathBuf,

        #[arg(short, long)]
        target: PathBuf,

        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show recent backup passes
    History {
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    /// List the files stored on a target
    List {
        #[arg(short, long)]
        target: PathBuf,
    },
    /// Copy selected backed-up paths to a destination
    Restore {
        #[arg(short, long)]
        target: PathBuf,

        #[arg(short, long)]
        dest: PathBuf,

        /// Paths relative to the backup root
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Remove payload files past the retention age
    Sweep {
        #[arg(short, long)]
        target: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let service = BackupService::from_config(&config);

    match args.command {
        Command::Run { source, target, yes } => run_pass(service, source, target, yes).await,
        Command::History { limit } => {
            let records = service.list_history(limit);
            if records.is_empty() {
                println!("No backups recorded yet");
            }
            for record in records {
                println!("{}", record.summary_line());
            }
            Ok(())
        }
        Command::List { target } => {
            let nodes =
                tokio::task::spawn_blocking(move || service.list_backup_contents(&target)).await??;
            print_tree(&nodes, 0);
            Ok(())
        }
        Command::Restore { target, dest, paths } => {
            let report = tokio::task::spawn_blocking(move || {
                service.restore_selection(&target, &paths[..], &dest)
            })
            .await??;
            println!("Restored {} files", report.files_restored);
            Ok(())
        }
        Command::Sweep { target } => {
            let report = tokio::task::spawn_blocking(move || service.sweep(&target)).await?;
            println!(
                "Removed {} files ({} bytes), {} skipped",
                report.removed_files, report.removed_bytes, report.skipped_files
            );
            Ok(())
        }
    }
}

async fn run_pass(
    service: BackupService,
    source: PathBuf,
    target: PathBuf,
    yes: bool,
) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let cancel = shutdown.token();
    let signals = tokio::spawn(async move { shutdown.wait_for_signal().await });

    tracing::info!("Starting delta-backup v{}", env!("CARGO_PKG_VERSION"));

    let outcome = tokio::task::spawn_blocking(move || {
        let confirm = |question: &Confirmation| yes || prompt(question);
        service.run_backup_with_cancel(&source, &target, confirm, &cancel)
    })
    .await??;
    signals.abort();

    println!("{}", outcome.record.summary_line());
    if outcome.record.status == PassStatus::Failed {
        bail!("backup failed: {}", outcome.record.error);
    }
    Ok(())
}

/// Ask on stdin; anything but y/yes declines.
fn prompt(question: &Confirmation) -> bool {
    print!("{question} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn print_tree(nodes: &[BackupNode], depth: usize) {
    for node in nodes {
        if node.is_dir() {
            println!("{:indent$}{}/", "", node.name, indent = depth * 2);
            print_tree(&node.children, depth + 1);
        } else {
            println!("{:indent$}{} ({} bytes)", "", node.name, node.size, indent = depth * 2);
        }
    }
}

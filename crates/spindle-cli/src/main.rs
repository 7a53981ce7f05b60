mod commands;
mod locks;
mod logging;
mod progress;

use std::env;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use locks::RepoLock;
use progress::{CliReporter, CronReporter};
use spindle_core::storage::models::DiscState;
use spindle_core::{MonitorEngine, ProgressReporter, Repository, ShellHook};
use tracing::{error, info};

fn main() -> ExitCode {
    dotenv().ok();

    let args = Cli::parse();
    let _guard = logging::init_logger(args.cronmode);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<()> {
    match &args.command {
        Some(Commands::Init { watch_dir }) => {
            let workdir = args
                .workdir
                .as_deref()
                .context("init needs an explicit --workdir")?;
            run_init(workdir, watch_dir, args.cronmode)
        }
        Some(Commands::Monitor) => {
            let repo = open_repository(args)?;
            let _lock = RepoLock::acquire(&repo.layout().lock_file())?;
            run_monitor(&repo, args.cronmode)
        }
        Some(Commands::Status { json }) => run_status(&open_repository(args)?, *json, args.cronmode),
        Some(Commands::Discs) => run_discs(&open_repository(args)?),
        Some(Commands::Lost {
            disc_id,
            no_refresh,
        }) => {
            let repo = open_repository(args)?;
            let _lock = RepoLock::acquire(&repo.layout().lock_file())?;
            run_lost(&repo, *disc_id, *no_refresh, args.cronmode)
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    }
}

fn open_repository(args: &Cli) -> Result<Repository> {
    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("Cannot determine the current directory")?,
    };
    Ok(Repository::open(&workdir)?)
}

fn run_init(workdir: &Path, watch_dir: &Path, cronmode: bool) -> Result<()> {
    let repo = Repository::init(workdir, watch_dir)?;
    if !cronmode {
        println!("Staging directory created:");
        println!("  Staging dir:  {}", repo.layout().root().display());
        println!("  Watched dir:  {}", repo.settings().watch_dir.display());
        println!("  Current Disc: {}", repo.manifest().require_current_disc()?);
        println!(
            "Edit {} to set the disc size and notification address.",
            repo.layout().settings_file().display()
        );
    }
    Ok(())
}

fn run_monitor(repo: &Repository, cronmode: bool) -> Result<()> {
    let hook = ShellHook::new(repo.layout());
    let reporter: Box<dyn ProgressReporter> = if cronmode {
        Box::new(CronReporter)
    } else {
        Box::new(CliReporter::new())
    };
    let report = MonitorEngine::new(repo, &hook).run(reporter.as_ref())?;

    info!(
        "Checked {} files in {}: {} copied ({} bytes), {} unchanged, {} failed",
        report.files_scanned,
        format!("{:.2}s", report.duration.as_secs_f64()).green(),
        format!("{}", report.files_copied).cyan(),
        report.bytes_copied,
        report.files_unchanged,
        if report.files_failed > 0 {
            format!("{}", report.files_failed).red()
        } else {
            format!("{}", report.files_failed).normal()
        },
    );
    if !report.discs_sealed.is_empty() {
        info!("Sealed discs: {:?}", report.discs_sealed);
    }
    Ok(())
}

fn run_status(repo: &Repository, json: bool, cronmode: bool) -> Result<()> {
    let status = repo.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    if cronmode {
        return Ok(());
    }

    let row = |label: &str, value: String| println!("{:<17}{}", label.bold(), value);
    row("Staging_dir:", status.working_dir.display().to_string());
    row("Watched_dir:", status.watch_dir.display().to_string());
    row("Emails_sent_to:", status.email.clone());
    row("Current_disc:", status.current_disc.to_string());
    row("Disc_threshold:", status.disc_threshold.to_string());
    row("Current_usage:", status.usage.total().to_string());
    row("Disc_Pct_full:", status.pct_full.to_string());
    row("Database_size:", status.usage.manifest_bytes.to_string());
    row("Files_size:", status.usage.file_bytes.to_string());
    row("Pct_database:", status.pct_database.to_string());
    row("Pct_db_overhead:", status.pct_db_overhead.to_string());
    row("available_isos:", status.available_isos.to_string());
    row("Distinct_files:", status.summary.distinct_files.to_string());
    row("File_versions:", status.summary.file_versions.to_string());
    row(
        "Latest_addition:",
        status
            .summary
            .latest_addition
            .clone()
            .unwrap_or_else(|| "-".to_string()),
    );
    row("Sealed_discs:", status.summary.sealed_discs.to_string());
    let lost = status.summary.lost_discs.to_string();
    row(
        "Lost_discs:",
        if status.summary.lost_discs > 0 {
            lost.red().to_string()
        } else {
            lost
        },
    );
    Ok(())
}

fn run_discs(repo: &Repository) -> Result<()> {
    let summaries = repo.manifest().disc_summaries()?;
    println!(
        "{:>5}  {:<12} {:<28} {:<28} {:>8} {:>14}",
        "Disc".bold(),
        "State".bold(),
        "Started".bold(),
        "Completed".bold(),
        "Files".bold(),
        "Bytes".bold()
    );
    for summary in summaries {
        let disc = &summary.disc;
        let (label, completed) = match &disc.state {
            DiscState::Open => ("open".green(), "-".to_string()),
            DiscState::Sealed {
                completed_at,
                dispatched_at: Some(_),
            } => ("sealed".normal(), completed_at.clone()),
            DiscState::Sealed {
                completed_at,
                dispatched_at: None,
            } => ("pending".yellow(), completed_at.clone()),
            DiscState::Unavailable { completed_at, .. } => (
                "lost".red(),
                completed_at.clone().unwrap_or_else(|| "-".to_string()),
            ),
        };
        println!(
            "{:>5}  {:<12} {:<28} {:<28} {:>8} {:>14}",
            disc.id,
            label,
            disc.started_at,
            completed,
            summary.copied_files,
            summary.copied_bytes
        );
    }
    Ok(())
}

fn run_lost(repo: &Repository, disc_id: i64, no_refresh: bool, cronmode: bool) -> Result<()> {
    let report = repo.mark_disc_lost(disc_id)?;
    if !report.newly_marked {
        println!("Disc {} was already marked lost", disc_id);
    }
    if !cronmode {
        for path in &report.requeued {
            println!("{} {}", "requeue".yellow(), path);
        }
    }
    for path in &report.missing {
        println!("{} {} (no longer in the watch directory)", "gone".red(), path);
    }
    println!(
        "Disc {}: {} files to copy again, {} unrecoverable",
        disc_id,
        report.requeued.len(),
        report.missing.len()
    );

    if no_refresh || report.requeued.is_empty() {
        return Ok(());
    }
    run_monitor(repo, cronmode)
}

mod analyzer;
mod classifier;
mod cleaner;
mod cli;
mod config;
mod error;
mod history;
mod logging;
mod model;
mod output;
mod safety;
mod scanner;
mod session;
mod utils;

use analyzer::{AnalysisCoverage, SystemFolderAnalyzer};
use anyhow::Result;
use chrono::Utc;
use cleaner::{DeleteOutcome, Deleter};
use cli::{Cli, Commands, ConfigActions, OutputFormat};
use config::Config;
use history::HistoryLogger;
use model::DirectoryInfo;
use output::AnalysisReport;
use scanner::{get_last_modified, tally_tree, ExclusionSet};
use session::{ScanOrchestrator, SessionPhase};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use utils::{format_number, format_size};

fn main() -> ExitCode {
    logging::init_logger();
    let cli = Cli::parse_args();

    let result = match Config::load() {
        Ok(config) => run(cli, config),
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    match cli.command {
        Commands::Analyze {
            roots,
            top,
            format,
            out,
        } => {
            return tokio::runtime::Runtime::new()
                .map_err(|e| anyhow::anyhow!("Failed to create tokio runtime: {}", e))?
                .block_on(run_analyze(&config, roots, top, format, out.as_deref()));
        }
        Commands::Classify { path, format } => run_classify(&path, &config, format)?,
        Commands::Inspect {
            path,
            format,
            refresh_apps,
        } => run_inspect(&path, &config, format, refresh_apps)?,
        Commands::Delete {
            path,
            execute,
            no_trash,
        } => return run_delete(&path, execute, no_trash, &config),
        Commands::History { limit } => run_history(limit)?,
        Commands::Config { action } => run_config(action, config)?,
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_analyze(
    config: &Config,
    roots: Vec<String>,
    top: Option<usize>,
    format: OutputFormat,
    out: Option<&str>,
) -> Result<ExitCode> {
    let mut scan = config.scan.clone();
    if !roots.is_empty() {
        scan.roots = roots;
    }

    let orchestrator = Arc::new(ScanOrchestrator::new(&scan));
    let interrupt = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling analysis");
            interrupt.cancel_analysis();
        }
    });

    let mut progress = orchestrator.subscribe();
    let progress_task = tokio::spawn(async move {
        let mut last: Option<PathBuf> = None;
        while progress.changed().await.is_ok() {
            let (current, percent) = {
                let state = progress.borrow_and_update();
                (state.current_directory.clone(), state.display_percent())
            };
            if let Some(dir) = &current {
                if last.as_ref() != Some(dir) {
                    eprintln!("[{percent:5.1}%] {}", dir.display());
                }
            }
            if current.is_some() {
                last = current;
            }
        }
    });

    let phase = orchestrator.start_analysis().await;
    let state = orchestrator.snapshot();
    let volume = orchestrator.settings().volume.clone();
    progress_task.abort();
    info!("analysis {phase}");

    let report = AnalysisReport::from_state(
        &state,
        &volume,
        top.unwrap_or(scan.top_n),
        Utc::now(),
    );

    let rendered = match format {
        OutputFormat::Json => report.to_json()?,
        OutputFormat::Human => report.render_human(),
    };
    match out {
        Some(path) => {
            fs::write(path, &rendered)?;
            println!("Report written to {}", path);
        }
        None => print!("{}", rendered),
    }

    Ok(match phase {
        SessionPhase::Completed => ExitCode::SUCCESS,
        SessionPhase::Cancelled => ExitCode::from(130),
        _ => ExitCode::from(1),
    })
}

/// Sizes `path` the way a scan root is sized, for one-off commands.
/// A symlinked path is measured at its target.
fn describe_path(path: &Path, config: &Config) -> Result<DirectoryInfo> {
    let target = if path.symlink_metadata()?.file_type().is_symlink() {
        fs::canonicalize(path)?
    } else {
        path.to_path_buf()
    };
    let metadata = fs::metadata(&target)?;
    let info = DirectoryInfo::new(path).with_last_modified(get_last_modified(&target));

    if !metadata.is_dir() {
        return Ok(info.with_size(metadata.len()).with_file_count(1));
    }

    let excluded = ExclusionSet::new(&config.scan.excluded_paths);
    let tally = tally_tree(&target, config.scan.max_entries_deep, &excluded, None);
    if tally.truncated {
        warn!(
            "entry limit of {} reached in {}; size is a lower bound",
            config.scan.max_entries_deep,
            path.display()
        );
    }
    Ok(info
        .with_size(tally.size)
        .with_file_count(tally.files)
        .with_truncated(tally.truncated))
}

fn run_classify(path: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let info = describe_path(Path::new(path), config)?;
    let recommendations = classifier::classify(&info);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&recommendations)?),
        OutputFormat::Human => {
            println!(
                "{} ({}, {} files)",
                info.path.display(),
                format_size(info.size),
                format_number(info.file_count)
            );
            for rec in &recommendations {
                println!(
                    "  {} / {} / {}",
                    rec.category,
                    rec.risk,
                    if rec.is_deletable { "deletable" } else { "keep" }
                );
                println!("  {}", rec.reason);
            }
            println!("  Rule: {}", classifier::matched_rule(&info, Utc::now()));
        }
    }

    Ok(())
}

fn run_inspect(path: &str, config: &Config, format: OutputFormat, refresh_apps: bool) -> Result<()> {
    let path = Path::new(path);
    let info = describe_path(path, config)?;
    let analyzer = SystemFolderAnalyzer::new()
        .with_child_entry_limit(config.scan.max_entries_shallow)
        .with_excluded(ExclusionSet::new(&config.scan.excluded_paths));
    if refresh_apps {
        let apps = analyzer.refresh_apps();
        if apps.is_empty() {
            warn!("no installed applications found; every vendor folder will look orphaned");
        } else {
            info!("{} installed application names", apps.len());
        }
    }
    let analysis = analyzer.analyze(path, &info);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
        OutputFormat::Human => {
            println!("{}", analysis.path.display());
            println!("  {}", analysis.summary);
            if analysis.coverage != AnalysisCoverage::Complete {
                return Ok(());
            }
            println!(
                "  Total: {}  Reclaimable: {} ({:.1}%)",
                format_size(analysis.total_size),
                format_size(analysis.deletable_size),
                analysis.deletable_percent()
            );

            println!("\nBreakdown:");
            for (group, size) in &analysis.breakdown {
                println!("  {:>10}  {}", format_size(*size), group);
            }

            println!("\nItems:");
            for rec in &analysis.recommendations {
                println!(
                    "  [{}, {}%] {} ({})",
                    rec.risk,
                    rec.deletable_percent,
                    rec.title,
                    format_size(rec.size)
                );
                println!("      {}", rec.description);
            }
        }
    }

    Ok(())
}

fn run_delete(path: &str, execute: bool, no_trash: bool, config: &Config) -> Result<ExitCode> {
    let deleter = Deleter::from_config(&config.clean)
        .with_trash(config.clean.use_trash && !no_trash)
        .with_dry_run(!execute);

    match deleter.delete(Path::new(path)) {
        Ok(DeleteOutcome::DryRun) => {
            println!("[DRY-RUN] Would delete: {}", path);
            println!("Run again with --execute to delete.");
        }
        Ok(DeleteOutcome::Trashed) => println!("Moved to trash: {}", path),
        Ok(DeleteOutcome::Removed) => println!("Deleted: {}", path),
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.needs_elevation() {
                eprintln!("Retry with administrator privileges (sudo) to delete this path.");
                return Ok(ExitCode::from(77));
            }
            return Ok(ExitCode::from(1));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn run_config(action: ConfigActions, mut config: Config) -> Result<()> {
    match action {
        ConfigActions::Show => {
            println!("Current configuration:");
            println!("  Roots:");
            if config.scan.roots.is_empty() {
                println!("    (built-in list)");
            }
            for root in &config.scan.roots {
                println!("    - {}", root);
            }
            println!("  Max depth: {}", config.scan.max_depth);
            println!("  Batch size: {}", config.scan.batch_size);
            println!(
                "  Entry limits: {} shallow, {} deep",
                format_number(config.scan.max_entries_shallow as u64),
                format_number(config.scan.max_entries_deep as u64)
            );
            println!(
                "  Timeouts: {}s shallow, {}s deep",
                config.scan.shallow_timeout_secs, config.scan.deep_timeout_secs
            );
            println!("  Top directories: {}", config.scan.top_n);
            println!("  Excluded paths:");
            for path in &config.scan.excluded_paths {
                println!("    - {}", path);
            }
            println!("  Use trash: {}", config.clean.use_trash);
            println!("  Log history: {}", config.clean.log_history);
        }
        ConfigActions::Set { key, value } => {
            match key.as_str() {
                "max_depth" => config.scan.max_depth = value.parse()?,
                "batch_size" => config.scan.batch_size = value.parse()?,
                "max_entries_shallow" => config.scan.max_entries_shallow = value.parse()?,
                "max_entries_deep" => config.scan.max_entries_deep = value.parse()?,
                "shallow_timeout_secs" => config.scan.shallow_timeout_secs = value.parse()?,
                "deep_timeout_secs" => config.scan.deep_timeout_secs = value.parse()?,
                "top_n" => config.scan.top_n = value.parse()?,
                "use_trash" => config.clean.use_trash = value.parse()?,
                "log_history" => config.clean.log_history = value.parse()?,
                _ => {
                    println!("Unknown key: {}", key);
                    println!(
                        "Available keys: max_depth, batch_size, max_entries_shallow, \
                         max_entries_deep, shallow_timeout_secs, deep_timeout_secs, top_n, \
                         use_trash, log_history"
                    );
                    return Ok(());
                }
            }
            config.save()?;
            println!("Set {} to {}", key, value);
        }
        ConfigActions::AddExclude { path } => {
            config.add_excluded_path(path.clone());
            config.save()?;
            println!("Added exclusion: {}", path);
        }
        ConfigActions::AddRoot { path } => {
            config.add_root(path.clone());
            config.save()?;
            println!("Added root: {}", path);
        }
    }

    Ok(())
}

fn run_history(limit: usize) -> Result<()> {
    let logger = HistoryLogger::new();
    let entries = logger.read_history(Some(limit))?;

    if entries.is_empty() {
        println!("No history found in {}.", logger.path().display());
        return Ok(());
    }

    println!("Last {} deletion(s):\n", entries.len());

    for entry in entries {
        println!(
            "{} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            entry.path.display()
        );
        if let Some(size) = entry.size {
            println!("    Size: {}", format_size(size));
        }
    }

    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn, Level};

use wxarchiver::config::{load_config, resolve_config_path};
use wxarchiver::logging::init_logging;
use wxarchiver::{
    http_source_factory, spawn_run, ArchiveStore, Config, LogRelay, Orchestrator, RunJob,
    RunOutcome, RunTrigger,
};

/// How long shutdown waits for an in-flight run before leaving it behind.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "wxarchiver-daemon", version)]
#[command(about = "Archives AviationWX.org webcam images on a schedule")]
struct Cli {
    /// Path to the YAML config file (defaults to $ARCHIVER_CONFIG, then /config/config.yaml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run one archive run now and exit with its outcome
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            // No subscriber yet; the log level lives in the config
            eprintln!("wxarchiver: {}", e);
            return ExitCode::from(2);
        }
    };

    let logging = init_logging(&config.logging);
    if let Some(e) = &logging.file_error {
        warn!(
            "Could not open log file {}: {}; logging to stdout only",
            config.logging.file, e
        );
    }

    info!("Starting wxarchiver v{}", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        info!("Using config file {}", config_path.display());
    } else {
        warn!(
            "Config file {} not found; running on defaults and ARCHIVER_* overrides",
            config_path.display()
        );
    }

    preflight(&config);

    if cli.once {
        run_once(&config)
    } else {
        run_daemon(config)
    }
}

/// Startup checks that warn but never stop the daemon.
fn preflight(config: &Config) {
    for (level, message) in preflight_notes(config) {
        log::log!(level, "{}", message);
    }
}

/// Configuration summary first, then archive root problems.
fn preflight_notes(config: &Config) -> Vec<(Level, String)> {
    let mut notes = Vec::new();
    if config.airports.archive_all {
        notes.push((Level::Info, "Archiving all airports listed by the source".to_string()));
    } else {
        notes.push((
            Level::Info,
            format!("Archiving {}", config.airports.selected.join(", ")),
        ));
    }
    if config.source.api_key.trim().is_empty() {
        notes.push((
            Level::Info,
            "No API key configured; using the anonymous rate limit".to_string(),
        ));
    }

    let root = PathBuf::from(&config.archive.output_dir);
    if !root.exists() {
        notes.push((
            Level::Warn,
            format!(
                "Archive root {} does not exist; it will be created on the first run",
                root.display()
            ),
        ));
    } else if let Err(e) = ArchiveStore::new(&root).ensure_writable() {
        notes.push((
            Level::Warn,
            format!("{}; runs will fail until this is fixed", e),
        ));
    }
    notes
}

fn run_once(config: &Config) -> ExitCode {
    let job = RunJob::new(config, RunTrigger::Direct);
    let handle = match spawn_run(job, http_source_factory(&config.source), LogRelay::detached())
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = match handle.join() {
        Ok(report) => report,
        Err(_) => {
            error!("Archive run thread panicked");
            return ExitCode::FAILURE;
        }
    };

    match report.outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::TimedOut => {
            warn!("Run hit its time budget; remaining frames are fetched next time");
            ExitCode::SUCCESS
        }
        RunOutcome::Failed => ExitCode::FAILURE,
    }
}

fn run_daemon(config: Config) -> ExitCode {
    let factory = http_source_factory(&config.source);
    let handle = match Orchestrator::new(config, factory).start() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start scheduler: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (stop_tx, stop_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        error!("Failed to install signal handler: {}", e);
        handle.shutdown();
        return ExitCode::FAILURE;
    }

    let _ = stop_rx.recv();
    info!("Shutdown requested");

    if handle.is_run_active() && !handle.wait_idle(SHUTDOWN_GRACE) {
        warn!("Exiting with a run in progress; its pending frames are picked up on the next start");
    }
    handle.shutdown();
    info!("Stopped");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_summarizes_config_even_without_archive_root() {
        let mut config = Config::default();
        config.archive.output_dir = "/nonexistent/wxarchiver-preflight".to_string();
        config.airports.selected = vec!["KSPB".into(), "KAWO".into()];

        let notes = preflight_notes(&config);
        let messages: Vec<&str> = notes.iter().map(|(_, m)| m.as_str()).collect();

        assert_eq!(messages[0], "Archiving KSPB, KAWO");
        assert!(messages[1].starts_with("No API key configured"));
        assert_eq!(notes[2].0, Level::Warn);
        assert!(messages[2].contains("does not exist"));
    }
}

//! Process-wide tracing setup: stdout plus an optional log file.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Maps a configured level name to an `EnvFilter` directive.
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// What `init_logging` could not set up.
#[derive(Debug, Default)]
pub struct LoggingInit {
    /// The log file could not be opened; logging went to stdout only.
    pub file_error: Option<io::Error>,
    /// A subscriber was already installed.
    pub already_initialized: bool,
}

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
/// `log` records are bridged into tracing.
pub fn init_logging(config: &LoggingConfig) -> LoggingInit {
    let mut init = LoggingInit::default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.level)));

    let file_layer = if config.file.trim().is_empty() {
        None
    } else {
        match open_log_file(Path::new(config.file.trim())) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                init.file_error = Some(e);
                None
            }
        }
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer);

    if tracing_log::LogTracer::init().is_err()
        || tracing::subscriber::set_global_default(subscriber).is_err()
    {
        init.already_initialized = true;
    }

    init
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("warning"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive(" debug "), "debug");
        assert_eq!(level_directive("verbose"), "info");
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/nested/archiver.log");
        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }
}

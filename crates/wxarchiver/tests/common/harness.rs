//! Test harness for archive runs against a temporary archive tree.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walkdir::WalkDir;

use wxarchiver::broadcast::{LogRelay, RelayMessage};
use wxarchiver::config::Config;
use wxarchiver::source::WebcamSource;
use wxarchiver::storage::layout::METADATA_FILENAME;
use wxarchiver::worker::{RunJob, RunReport, RunTrigger, Worker};

use super::builders::ConfigBuilder;

/// Everything a run produced.
pub struct RunResult {
    pub report: RunReport,
    pub messages: Vec<RelayMessage>,
}

impl RunResult {
    pub fn log_lines(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                RelayMessage::Log(event) => Some(event.message.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub archive_root: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let archive_root = temp_dir.path().join("archive");
        Self {
            temp_dir,
            archive_root,
        }
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Config builder already pointed at this harness' archive root.
    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new().output_dir(&self.archive_root)
    }

    pub fn job(&self, config: &Config, budget: Duration) -> RunJob {
        let mut job = RunJob::new(config, RunTrigger::Direct);
        job.settings.budget = budget;
        job
    }

    /// Runs a worker in the current runtime and collects what it relayed.
    pub async fn run(&self, job: &RunJob, source: Arc<dyn WebcamSource>) -> RunResult {
        let (relay, receiver) = LogRelay::channel();
        let report = Worker::new(job, source, relay).run().await;
        let messages = receiver.try_iter().collect();
        RunResult { report, messages }
    }

    /// Archived frames relative to the root, sorted; metadata excluded.
    pub fn archived_files(&self) -> Vec<String> {
        if !self.archive_root.exists() {
            return Vec::new();
        }
        let mut files: Vec<String> = WalkDir::new(&self.archive_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name() != METADATA_FILENAME)
            .map(|e| {
                e.path()
                    .strip_prefix(&self.archive_root)
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect();
        files.sort();
        files
    }

    /// Writes a file under the archive root, creating parents.
    pub fn write_archive_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.archive_root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }
}

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::storage::layout::{embedded_timestamp, METADATA_FILENAME};

/// Depth of `<AIRPORT>` below the archive root. Airport directories hold
/// `metadata.json` and are never pruned.
const AIRPORT_DEPTH: usize = 1;

/// One archived file as seen by retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    /// Capture time from the filename, else the file's mtime.
    pub timestamp: DateTime<Utc>,
    pub size: u64,
}

/// The slice of a filesystem that retention needs.
pub trait ArchiveFs: Send + Sync {
    /// Every archived frame under the root. Metadata and in-flight temp
    /// files are not included.
    fn list_files(&self) -> io::Result<Vec<ArchiveFile>>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Removes empty date and camera directories; returns how many went.
    fn prune_empty_dirs(&self) -> usize;
}

pub struct LocalArchiveFs {
    root: PathBuf,
}

impl LocalArchiveFs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_archived_frame(name: &str) -> bool {
    name != METADATA_FILENAME && !name.starts_with('.')
}

impl ArchiveFs for LocalArchiveFs {
    fn list_files(&self) -> io::Result<Vec<ArchiveFile>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("archive root {} does not exist", self.root.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Retention: skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !is_archived_frame(&name) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Retention: could not stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let timestamp = match embedded_timestamp(&name) {
                Some(ts) => ts,
                None => match metadata.modified() {
                    Ok(modified) => modified.into(),
                    Err(_) => continue,
                },
            };

            files.push(ArchiveFile {
                path: entry.path().to_path_buf(),
                timestamp,
                size: metadata.len(),
            });
        }
        Ok(files)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn prune_empty_dirs(&self) -> usize {
        let mut pruned = 0;
        let dirs = WalkDir::new(&self.root)
            .min_depth(AIRPORT_DEPTH + 1)
            .contents_first(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir());

        for dir in dirs {
            let is_empty = std::fs::read_dir(dir.path())
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                continue;
            }
            match std::fs::remove_dir(dir.path()) {
                Ok(()) => pruned += 1,
                Err(e) => warn!(
                    "Retention: failed to remove empty directory {}: {}",
                    dir.path().display(),
                    e
                ),
            }
        }
        pruned
    }
}

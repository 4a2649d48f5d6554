use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::ArchiveConfig;
use crate::retention::fs::{ArchiveFile, ArchiveFs};

/// Age and size limits for the whole archive tree. Zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub max_total_bytes: u64,
}

impl RetentionPolicy {
    pub fn from_config(archive: &ArchiveConfig) -> Self {
        Self {
            max_age_days: archive.retention_days,
            max_total_bytes: archive.retention_max_bytes(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_age_days > 0 || self.max_total_bytes > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub ran_at: Option<DateTime<Utc>>,
    pub deleted_by_age: usize,
    pub deleted_by_size: usize,
    pub bytes_freed: u64,
    pub bytes_remaining: u64,
    pub failures: usize,
    pub dirs_pruned: usize,
}

impl RetentionReport {
    pub fn files_deleted(&self) -> usize {
        self.deleted_by_age + self.deleted_by_size
    }
}

/// Applies a [`RetentionPolicy`] to an archive tree.
pub struct RetentionEngine<F: ArchiveFs> {
    fs: F,
    policy: RetentionPolicy,
}

impl<F: ArchiveFs> RetentionEngine<F> {
    pub fn new(fs: F, policy: RetentionPolicy) -> Self {
        Self { fs, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// One pass: age limit first, then oldest-first deletion until the tree
    /// fits the size cap. A file that cannot be deleted is logged and skipped.
    pub fn apply(&self, now: DateTime<Utc>) -> RetentionReport {
        let span = info_span!("retention_pass");
        let _guard = span.enter();

        let mut report = RetentionReport {
            ran_at: Some(now),
            ..RetentionReport::default()
        };

        if !self.policy.is_enabled() {
            debug!("Retention disabled");
            return report;
        }

        let mut files = match self.fs.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Retention: nothing to clean ({})", e);
                return report;
            }
        };

        if self.policy.max_age_days > 0 {
            let cutoff = now - ChronoDuration::days(i64::from(self.policy.max_age_days));
            files.retain(|file| {
                if file.timestamp >= cutoff {
                    return true;
                }
                if self.delete(file, &mut report) {
                    report.deleted_by_age += 1;
                    false
                } else {
                    true
                }
            });
        }

        let mut total: u64 = files.iter().map(|f| f.size).sum();

        if self.policy.max_total_bytes > 0 && total > self.policy.max_total_bytes {
            files.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.path.cmp(&b.path))
            });
            for file in &files {
                if total <= self.policy.max_total_bytes {
                    break;
                }
                if self.delete(file, &mut report) {
                    report.deleted_by_size += 1;
                    total = total.saturating_sub(file.size);
                }
            }
        }
        report.bytes_remaining = total;

        if report.files_deleted() > 0 {
            report.dirs_pruned = self.fs.prune_empty_dirs();
            info!(
                "Retention: deleted {} file(s) ({} by age, {} by size), freed {} bytes",
                report.files_deleted(),
                report.deleted_by_age,
                report.deleted_by_size,
                report.bytes_freed
            );
        } else {
            debug!("Retention: nothing to delete");
        }

        report
    }

    fn delete(&self, file: &ArchiveFile, report: &mut RetentionReport) -> bool {
        match self.fs.remove_file(&file.path) {
            Ok(()) => {
                report.bytes_freed += file.size;
                true
            }
            Err(e) => {
                warn!("Retention: failed to remove {}: {}", file.path.display(), e);
                report.failures += 1;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use chrono::TimeZone;

    const MB: u64 = 1024 * 1024;

    #[derive(Default)]
    struct MemoryFs {
        files: Mutex<BTreeMap<PathBuf, ArchiveFile>>,
        locked: HashSet<PathBuf>,
        prunes: Mutex<usize>,
    }

    impl MemoryFs {
        fn with(files: Vec<ArchiveFile>) -> Self {
            Self {
                files: Mutex::new(files.into_iter().map(|f| (f.path.clone(), f)).collect()),
                ..Self::default()
            }
        }

        fn paths(&self) -> Vec<String> {
            self.files
                .lock()
                .unwrap()
                .keys()
                .map(|p| p.display().to_string())
                .collect()
        }
    }

    impl ArchiveFs for MemoryFs {
        fn list_files(&self) -> io::Result<Vec<ArchiveFile>> {
            Ok(self.files.lock().unwrap().values().cloned().collect())
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            if self.locked.contains(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "gone"))
        }

        fn prune_empty_dirs(&self) -> usize {
            *self.prunes.lock().unwrap() += 1;
            0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn file(name: &str, day: u32, size: u64) -> ArchiveFile {
        ArchiveFile {
            path: PathBuf::from(name),
            timestamp: Utc.with_ymd_and_hms(2024, 6, day, 8, 0, 0).unwrap(),
            size,
        }
    }

    #[test]
    fn test_size_cap_deletes_oldest_first() {
        // 150MB over five days, 30MB per day
        let fs = MemoryFs::with(vec![
            file("day1", 1, 30 * MB),
            file("day2", 2, 30 * MB),
            file("day3", 3, 30 * MB),
            file("day4", 4, 30 * MB),
            file("day5", 5, 30 * MB),
        ]);
        let engine = RetentionEngine::new(
            fs,
            RetentionPolicy {
                max_age_days: 0,
                max_total_bytes: 100 * MB,
            },
        );

        let report = engine.apply(now());

        assert_eq!(report.deleted_by_size, 2);
        assert_eq!(report.bytes_freed, 60 * MB);
        assert_eq!(report.bytes_remaining, 90 * MB);
        assert_eq!(engine.fs.paths(), vec!["day3", "day4", "day5"]);
    }

    #[test]
    fn test_under_cap_is_untouched() {
        let fs = MemoryFs::with(vec![file("a", 1, 10), file("b", 2, 10)]);
        let engine = RetentionEngine::new(
            fs,
            RetentionPolicy {
                max_age_days: 0,
                max_total_bytes: 20,
            },
        );
        let report = engine.apply(now());
        assert_eq!(report.files_deleted(), 0);
        assert_eq!(report.bytes_remaining, 20);
        assert_eq!(*engine.fs.prunes.lock().unwrap(), 0);
    }

    #[test]
    fn test_age_limit_keeps_newer_files() {
        let fs = MemoryFs::with(vec![
            file("old", 1, 10),
            file("edge", 3, 10),
            file("new", 9, 10),
        ]);
        let engine = RetentionEngine::new(
            fs,
            RetentionPolicy {
                max_age_days: 7,
                max_total_bytes: 0,
            },
        );

        let report = engine.apply(now());

        // cutoff is 2024-06-03 12:00; "edge" is 08:00 that day
        assert_eq!(report.deleted_by_age, 2);
        assert_eq!(engine.fs.paths(), vec!["new"]);
        assert_eq!(*engine.fs.prunes.lock().unwrap(), 1);
    }

    #[test]
    fn test_both_policies_in_one_pass() {
        let fs = MemoryFs::with(vec![
            file("ancient", 1, 50),
            file("d8", 8, 40),
            file("d9", 9, 40),
            file("d10", 10, 40),
        ]);
        let engine = RetentionEngine::new(
            fs,
            RetentionPolicy {
                max_age_days: 5,
                max_total_bytes: 80,
            },
        );

        let report = engine.apply(now());

        assert_eq!(report.deleted_by_age, 1);
        assert_eq!(report.deleted_by_size, 1);
        assert_eq!(engine.fs.paths(), vec!["d10", "d9"]);
    }

    #[test]
    fn test_failed_delete_does_not_abort_pass() {
        let mut fs = MemoryFs::with(vec![
            file("day1", 1, 30),
            file("day2", 2, 30),
            file("day3", 3, 30),
        ]);
        fs.locked.insert(PathBuf::from("day1"));
        let engine = RetentionEngine::new(
            fs,
            RetentionPolicy {
                max_age_days: 0,
                max_total_bytes: 40,
            },
        );

        let report = engine.apply(now());

        assert_eq!(report.failures, 1);
        assert_eq!(report.deleted_by_size, 2);
        assert_eq!(engine.fs.paths(), vec!["day1"]);
    }

    #[test]
    fn test_disabled_policy_does_nothing() {
        let fs = MemoryFs::with(vec![file("a", 1, 10)]);
        let engine = RetentionEngine::new(fs, RetentionPolicy::default());
        let report = engine.apply(now());
        assert_eq!(report.files_deleted(), 0);
        assert_eq!(engine.fs.paths(), vec!["a"]);
    }
}

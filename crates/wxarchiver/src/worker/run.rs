//! One archive run, from airport discovery to the final summary.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::broadcast::LogRelay;
use crate::config::{Config, ScheduleConfig, SourceConfig};
use crate::error::{RunError, SourceError, WorkerError};
use crate::retention::{LocalArchiveFs, RetentionEngine, RetentionPolicy, RetentionReport};
use crate::sanitize::redact_url;
use crate::source::{AirportSelection, AirportSummary, HttpSource, WebcamSource};
use crate::storage::{AirportMetadata, ArchiveStore, FrameRef};
use crate::worker::rate_limit::RateLimiter;
use crate::worker::retry::{with_retry, RetryPolicy};
use crate::worker::selector::{AirportCandidates, FetchInstruction, FrameSelector, SelectionMode};

/// Builds the source a run talks to. Called on the run's own thread so the
/// client lives on that run's runtime.
pub type SourceFactory =
    Arc<dyn Fn() -> Result<Arc<dyn WebcamSource>, SourceError> + Send + Sync>;

/// Factory for the real HTTP source.
pub fn http_source_factory(config: &SourceConfig) -> SourceFactory {
    let config = config.clone();
    Arc::new(move || {
        let source: Arc<dyn WebcamSource> = Arc::new(HttpSource::new(&config)?);
        Ok(source)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Startup,
    Interval,
    Manual,
    Direct,
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunTrigger::Startup => write!(f, "startup"),
            RunTrigger::Interval => write!(f, "interval"),
            RunTrigger::Manual => write!(f, "manual"),
            RunTrigger::Direct => write!(f, "direct"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// The time budget ran out; whatever was archived stays archived.
    TimedOut,
    /// The run could not do any work at all.
    Failed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::TimedOut => write!(f, "timed out"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Per-airport counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AirportCounts {
    pub cameras: usize,
    pub pending: usize,
    pub fetched: usize,
    pub saved: usize,
    pub failed: usize,
    /// Frames the source no longer had (404/410).
    pub expired: usize,
    /// The airport was skipped for this run.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub airports_processed: usize,
    pub airports_skipped: usize,
    pub frames_pending: usize,
    pub frames_fetched: usize,
    pub frames_saved: usize,
    pub frames_failed: usize,
    pub frames_expired: usize,
    pub errors: usize,
    pub rounds: usize,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
    pub per_airport: BTreeMap<String, AirportCounts>,
    pub error: Option<String>,
    pub retention: Option<RetentionReport>,
}

impl RunReport {
    fn new(run_id: Uuid, trigger: RunTrigger) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            trigger,
            outcome: RunOutcome::Completed,
            started_at: now,
            finished_at: now,
            stats: RunStats::default(),
            per_airport: BTreeMap::new(),
            error: None,
            retention: None,
        }
    }

    /// A run that never got going.
    pub fn failed(run_id: Uuid, trigger: RunTrigger, error: impl std::fmt::Display) -> Self {
        let mut report = Self::new(run_id, trigger);
        report.outcome = RunOutcome::Failed;
        report.error = Some(error.to_string());
        report
    }
}

/// Everything a run needs to know, resolved from [`Config`] up front.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub budget: Duration,
    pub retry: RetryPolicy,
    pub use_history: bool,
    pub priority_yield: Option<Duration>,
    pub selection: AirportSelection,
    /// Retention to apply once the run is done, when enabled.
    pub retention_after_run: Option<RetentionPolicy>,
    /// Request delay when the rate-limit probe fails.
    pub fallback_delay: Duration,
}

impl RunSettings {
    pub fn from_config(config: &Config, trigger: RunTrigger) -> Self {
        let retention = RetentionPolicy::from_config(&config.archive);
        Self {
            budget: run_budget(&config.schedule, trigger),
            retry: RetryPolicy::from_config(&config.source),
            use_history: config.source.use_history_api,
            priority_yield: config.schedule.priority_yield(),
            selection: AirportSelection {
                archive_all: config.airports.archive_all,
                selected: config.airports.selected.clone(),
            },
            retention_after_run: (config.archive.retention_after_run && retention.is_enabled())
                .then_some(retention),
            fallback_delay: config.source.fallback_request_delay(),
        }
    }
}

/// Time a run may spend: 90% of the interval for scheduled runs, the job
/// timeout for manual and direct runs.
pub fn run_budget(schedule: &ScheduleConfig, trigger: RunTrigger) -> Duration {
    let scheduled = schedule.interval() * 9 / 10;
    match trigger {
        RunTrigger::Startup | RunTrigger::Interval => scheduled,
        RunTrigger::Manual | RunTrigger::Direct => {
            if schedule.job_timeout_minutes > 0 {
                Duration::from_secs(schedule.job_timeout_minutes * 60)
            } else {
                scheduled
            }
        }
    }
}

/// A run waiting to be executed.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub archive_root: PathBuf,
    pub settings: RunSettings,
}

impl RunJob {
    pub fn new(config: &Config, trigger: RunTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            archive_root: PathBuf::from(&config.archive.output_dir),
            settings: RunSettings::from_config(config, trigger),
        }
    }
}

/// Executes a single archive run.
pub struct Worker {
    source: Arc<dyn WebcamSource>,
    store: ArchiveStore,
    settings: RunSettings,
    relay: LogRelay,
    limiter: RateLimiter,
    report: RunReport,
}

impl Worker {
    pub fn new(job: &RunJob, source: Arc<dyn WebcamSource>, relay: LogRelay) -> Self {
        Self {
            source,
            store: ArchiveStore::new(&job.archive_root),
            settings: job.settings.clone(),
            relay,
            limiter: RateLimiter::new(job.settings.fallback_delay),
            report: RunReport::new(job.id, job.trigger),
        }
    }

    pub async fn run(mut self) -> RunReport {
        let started = Instant::now();
        self.report.started_at = Utc::now();
        self.relay.info(&format!(
            "Archive run started ({}, budget {}s)",
            self.report.trigger,
            self.settings.budget.as_secs()
        ));

        if let Err(e) = self.store.ensure_writable() {
            return self.fail(RunError::ArchiveRoot(e));
        }

        let listing = {
            let source = self.source.as_ref();
            with_retry(
                &self.settings.retry,
                &mut self.limiter,
                source,
                "airport list",
                move || source.list_airports(),
            )
            .await
        };
        let airports = match listing {
            Ok(listing) => self.settings.selection.apply(listing),
            Err(e) => return self.fail(RunError::AirportList(e)),
        };
        if airports.is_empty() {
            self.relay.warn("No airports to archive; check airports.selected");
        }

        let mut candidates = Vec::with_capacity(airports.len());
        for airport in &airports {
            if started.elapsed() >= self.settings.budget {
                self.report.stats.timed_out = true;
                break;
            }
            if let Some(airport_candidates) = self.prepare_airport(airport).await {
                candidates.push(airport_candidates);
            }
        }

        let mode = if self.settings.use_history {
            SelectionMode::RoundRobin
        } else {
            SelectionMode::CurrentOnly
        };
        let selector = FrameSelector::new(candidates, mode);
        self.report.stats.frames_pending = selector.pending_count();
        debug!(
            "{} frame(s) pending across {} airport(s)",
            selector.pending_count(),
            selector.airport_count()
        );

        let mut selection = selector.into_selection();
        while !self.report.stats.timed_out {
            if started.elapsed() >= self.settings.budget {
                self.report.stats.timed_out = true;
                break;
            }
            let Some(instruction) = selection.next() else {
                break;
            };
            if let Some(pause) = self.settings.priority_yield {
                tokio::time::sleep(pause).await;
            }
            self.fetch_and_store(&instruction).await;
            self.publish_counts(&instruction.airport_code);
        }
        self.report.stats.rounds = selection.round();

        if self.report.stats.timed_out {
            self.relay.warn(&format!(
                "Run budget of {}s exhausted; {} frame(s) left for the next run",
                self.settings.budget.as_secs(),
                selection.remaining()
            ));
        }

        self.finish().await
    }

    /// Lists an airport's cameras and everything it has pending. `None`
    /// skips the airport for this run.
    async fn prepare_airport(&mut self, airport: &AirportSummary) -> Option<AirportCandidates> {
        let code = airport.code.as_str();
        let source_handle = Arc::clone(&self.source);
        let source = source_handle.as_ref();
        let policy = self.settings.retry;

        let listing = match with_retry(
            &policy,
            &mut self.limiter,
            source,
            &format!("{} webcam list", code),
            move || source.list_webcams(code),
        )
        .await
        {
            Ok(listing) => listing,
            Err(e) => {
                self.skip_airport(code, &format!("webcam list unavailable ({})", e));
                return None;
            }
        };

        let metadata = AirportMetadata {
            airport: airport.raw.clone(),
            api_response: listing.raw.clone(),
            last_updated: Utc::now(),
        };
        if let Err(e) = self.store.write_metadata(code, &metadata) {
            self.relay
                .warn(&format!("Failed to write metadata for {}: {}", code, e));
        }

        if listing.webcams.is_empty() {
            self.skip_airport(code, "no webcams listed");
            return None;
        }

        let captured_at = Utc::now();
        let mut candidates = AirportCandidates::new(code);
        for webcam in &listing.webcams {
            let camera = webcam.to_camera_target(code);

            if self.settings.use_history && camera.has_history() {
                let history = with_retry(
                    &policy,
                    &mut self.limiter,
                    source,
                    &format!("{} {} history", code, camera.dir_name),
                    {
                        let camera = &camera;
                        move || source.list_history(camera)
                    },
                )
                .await;
                match history {
                    Ok(frames) => {
                        for frame in frames {
                            candidates.push(
                                camera.clone(),
                                FrameRef::History {
                                    timestamp: frame.timestamp,
                                    camera_index: camera.index,
                                    url: frame.url,
                                },
                            );
                        }
                    }
                    Err(e) => self.relay.warn(&format!(
                        "History unavailable for {} {}: {}",
                        code, camera.dir_name, e
                    )),
                }
            } else if let Some(url) = camera.image_url.clone() {
                candidates.push(camera, FrameRef::Current { captured_at, url });
            } else {
                debug!("{} camera {} has no image URL", code, camera.index);
            }
        }

        candidates.retain_pending(&self.store);

        self.report.stats.airports_processed += 1;
        let counts = self.report.per_airport.entry(code.to_string()).or_default();
        counts.cameras = listing.webcams.len();
        counts.pending = candidates.frames.len();
        self.publish_counts(code);

        Some(candidates)
    }

    /// Sends an airport's counts so far to the status side.
    fn publish_counts(&self, code: &str) {
        if let Some(counts) = self.report.per_airport.get(code) {
            self.relay.airport(code, counts.clone());
        }
    }

    fn skip_airport(&mut self, code: &str, reason: &str) {
        self.relay.warn(&format!("Skipping {}: {}", code, reason));
        self.report.stats.airports_skipped += 1;
        self.report
            .per_airport
            .entry(code.to_string())
            .or_default()
            .skipped = true;
        self.publish_counts(code);
    }

    async fn fetch_and_store(&mut self, instruction: &FetchInstruction) {
        let FetchInstruction {
            airport_code,
            camera,
            frame,
        } = instruction;
        let source = self.source.as_ref();
        let policy = self.settings.retry;
        let url = frame.url();

        let result = with_retry(
            &policy,
            &mut self.limiter,
            source,
            &format!("{} {} {}", airport_code, camera.dir_for(frame), frame.filename()),
            move || source.fetch_frame(url),
        )
        .await;

        let counts = self
            .report
            .per_airport
            .entry(airport_code.clone())
            .or_default();
        let stats = &mut self.report.stats;

        let content = match result {
            Ok(content) => content,
            Err(e) if e.is_not_found() => {
                counts.expired += 1;
                stats.frames_expired += 1;
                debug!("Frame aged out upstream: {}", redact_url(url));
                return;
            }
            Err(e) => {
                counts.failed += 1;
                stats.frames_failed += 1;
                stats.errors += 1;
                self.relay.error(&format!(
                    "Failed to fetch {} {} {}: {}",
                    airport_code,
                    camera.dir_for(frame),
                    frame.filename(),
                    e
                ));
                return;
            }
        };

        counts.fetched += 1;
        stats.frames_fetched += 1;

        match self.store.store_frame(camera, frame, &content) {
            Ok(path) => {
                counts.saved += 1;
                stats.frames_saved += 1;
                debug!("Archived {} -> {}", redact_url(url), path.display());
            }
            Err(e) => {
                counts.failed += 1;
                stats.frames_failed += 1;
                stats.errors += 1;
                self.relay.error(&format!(
                    "Failed to store {} {} {}: {}",
                    airport_code,
                    camera.dir_for(frame),
                    frame.filename(),
                    e
                ));
            }
        }
    }

    async fn finish(mut self) -> RunReport {
        for (code, counts) in &self.report.per_airport {
            self.relay.airport(code, counts.clone());
        }

        let stats = &self.report.stats;
        if stats.airports_processed > 0 && stats.frames_pending > 0 && stats.frames_fetched == 0 {
            self.relay.warn(
                "Airports were processed but no frames were fetched; check the source and network",
            );
        }
        if stats.frames_fetched > 0 && stats.frames_saved == 0 {
            self.relay.warn(
                "Frames were fetched but none were saved; check that the archive root is writable",
            );
        }

        if let Some(policy) = self.settings.retention_after_run {
            let engine = RetentionEngine::new(LocalArchiveFs::new(self.store.root()), policy);
            let retention = engine.apply(Utc::now());
            if retention.files_deleted() > 0 {
                self.relay.info(&format!(
                    "Retention removed {} file(s), freed {} bytes",
                    retention.files_deleted(),
                    retention.bytes_freed
                ));
            }
            self.report.retention = Some(retention);
        }

        self.report.outcome = if self.report.stats.timed_out {
            RunOutcome::TimedOut
        } else {
            RunOutcome::Completed
        };
        self.report.finished_at = Utc::now();

        let stats = &self.report.stats;
        self.relay.info(&format!(
            "Archive run {}: {} airport(s) processed, {} skipped; {} of {} frame(s) saved, {} failed, {} expired, {} round(s)",
            self.report.outcome,
            stats.airports_processed,
            stats.airports_skipped,
            stats.frames_saved,
            stats.frames_pending,
            stats.frames_failed,
            stats.frames_expired,
            stats.rounds
        ));

        self.report
    }

    fn fail(mut self, error: RunError) -> RunReport {
        self.relay.error(&format!("Archive run failed: {}", error));
        self.report.outcome = RunOutcome::Failed;
        self.report.error = Some(error.to_string());
        self.report.stats.errors += 1;
        self.report.finished_at = Utc::now();
        self.report
    }
}

/// Runs `job` on its own thread and runtime. The report is returned from the
/// thread and also sent over `relay` as the final message, even when the
/// run panics or its source cannot be built.
pub fn spawn_run(
    job: RunJob,
    factory: SourceFactory,
    relay: LogRelay,
) -> Result<JoinHandle<RunReport>, WorkerError> {
    thread::Builder::new()
        .name(format!("archive-run-{}", job.trigger))
        .spawn(move || {
            let report = execute_run(&job, &factory, relay.clone());
            relay.finished(report.clone());
            report
        })
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
}

fn execute_run(job: &RunJob, factory: &SourceFactory, relay: LogRelay) -> RunReport {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let error = WorkerError::SpawnFailed(format!("Failed to create runtime: {}", e));
            relay.error(&format!("Archive run failed: {}", error));
            return RunReport::failed(job.id, job.trigger, error);
        }
    };

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(async {
            let source = match factory() {
                Ok(source) => source,
                Err(e) => {
                    relay.error(&format!("Archive run failed: could not create source: {}", e));
                    return RunReport::failed(job.id, job.trigger, e);
                }
            };
            let span = info_span!("archive_run", trigger = %job.trigger, holder = %job.id);
            Worker::new(job, source, relay.clone())
                .run()
                .instrument(span)
                .await
        })
    }));

    outcome.unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let error = RunError::Worker(WorkerError::Panicked(message));
        relay.error(&format!("Archive run failed: {}", error));
        RunReport::failed(job.id, job.trigger, error)
    })
}

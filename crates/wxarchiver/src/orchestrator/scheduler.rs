//! Decides when archive runs and retention passes happen.
//!
//! Every trigger (startup, interval tick, manual request) goes through the
//! same acquire-or-skip path on the [`RunLockSlot`], so runs never overlap.
//! Runs execute on their own threads; the scheduler only ever waits on its
//! timers and control channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

use crate::broadcast::{LogEvent, LogLevel, LogRelay, RelayMessage, RelayReceiver};
use crate::config::Config;
use crate::error::{RunError, WorkerError};
use crate::orchestrator::daily;
use crate::orchestrator::run_lock::{AcquireOutcome, RunLockSlot};
use crate::orchestrator::status::{RunStatus, StatusBoard};
use crate::retention::{LocalArchiveFs, RetentionEngine, RetentionPolicy};
use crate::worker::{spawn_run, RunJob, RunReport, RunTrigger, SourceFactory};

/// Requests sent to a running orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    RunNow,
    RetentionNow,
    Shutdown,
}

pub struct Orchestrator {
    config: Arc<Config>,
    factory: SourceFactory,
    board: Arc<StatusBoard>,
    lock: Arc<RunLockSlot>,
    retention_running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: Config, factory: SourceFactory) -> Self {
        let board = Arc::new(StatusBoard::new(config.status.log_buffer_size));
        Self {
            config: Arc::new(config),
            factory,
            board,
            lock: Arc::new(RunLockSlot::new()),
            retention_running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    pub fn run_lock(&self) -> Arc<RunLockSlot> {
        Arc::clone(&self.lock)
    }

    /// Starts the scheduler loop on a background thread.
    pub fn start(self) -> Result<OrchestratorHandle, WorkerError> {
        let (control, control_rx) = broadcast::channel(16);
        let board = Arc::clone(&self.board);
        let lock = Arc::clone(&self.lock);
        let shutdown = Arc::clone(&self.shutdown);

        let thread = thread::Builder::new()
            .name("orchestrator".to_string())
            .spawn(move || self.run_loop(control_rx))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(OrchestratorHandle {
            control,
            board,
            lock,
            shutdown,
            thread: Some(thread),
        })
    }

    fn run_loop(self, mut control_rx: broadcast::Receiver<ControlSignal>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.board.log(
                    LogLevel::Error,
                    &format!("Scheduler could not start its runtime: {}", e),
                );
                return;
            }
        };

        runtime.block_on(async {
            let schedule = &self.config.schedule;
            let archive = &self.config.archive;
            let interval = schedule.interval();
            let retention = RetentionPolicy::from_config(archive);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick is immediate
            let mut startup_pending = schedule.fetch_on_start;
            if !startup_pending {
                ticker.tick().await;
                self.set_next_run(interval);
            }

            let next_retention_at = || {
                daily::next_occurrence(
                    Utc::now(),
                    archive.retention_daily_hour,
                    archive.retention_daily_minute,
                )
            };
            let mut next_retention = retention.is_enabled().then(next_retention_at);

            self.board.log(
                LogLevel::Info,
                &format!(
                    "Scheduler started: archive run every {} minute(s){}",
                    interval.as_secs() / 60,
                    match next_retention {
                        Some(at) => format!(", daily retention at {} UTC", at.format("%H:%M")),
                        None => String::new(),
                    }
                ),
            );

            loop {
                if self.shutdown.load(Ordering::Acquire) {
                    break;
                }

                let retention_wait = next_retention
                    .map(|at| daily::duration_until(Utc::now(), at))
                    .unwrap_or(Duration::MAX);

                tokio::select! {
                    _ = ticker.tick() => {
                        let trigger = if std::mem::take(&mut startup_pending) {
                            RunTrigger::Startup
                        } else {
                            RunTrigger::Interval
                        };
                        self.set_next_run(interval);
                        self.start_run(trigger);
                    }
                    _ = tokio::time::sleep(retention_wait), if next_retention.is_some() => {
                        self.start_retention(retention);
                        next_retention = Some(next_retention_at());
                    }
                    signal = control_rx.recv() => match signal {
                        Ok(ControlSignal::RunNow) => {
                            self.start_run(RunTrigger::Manual);
                        }
                        Ok(ControlSignal::RetentionNow) => self.start_retention(retention),
                        Ok(ControlSignal::Shutdown) | Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(missed)) => {
                            log::debug!("Scheduler missed {} control signal(s)", missed);
                        }
                    },
                }
            }
        });

        self.board.set_next_run(None);
        self.board.log(LogLevel::Info, "Scheduler stopped");
    }

    fn set_next_run(&self, interval: Duration) {
        let next = ChronoDuration::from_std(interval)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta));
        self.board.set_next_run(next);
    }

    /// Acquire-or-skip. Returns whether a run was launched.
    fn start_run(&self, trigger: RunTrigger) -> bool {
        let job = RunJob::new(&self.config, trigger);
        let run_id = job.id;
        let now = Utc::now();
        let stale_after = self.config.schedule.interval() * 2;

        match self.lock.try_acquire(run_id, now, stale_after) {
            AcquireOutcome::Busy { holder, age } => {
                self.board.record_skipped();
                self.board.log(
                    LogLevel::Info,
                    &format!(
                        "Skipping {} run: run {} has been in progress for {}s",
                        trigger,
                        holder.holder_id,
                        age.as_secs()
                    ),
                );
                return false;
            }
            AcquireOutcome::Acquired {
                cleared_stale: Some(stale),
                ..
            } => {
                self.board.log(
                    LogLevel::Warn,
                    &format!(
                        "Cleared stale run lock held by {} since {}",
                        stale.holder_id,
                        stale.started_at.to_rfc3339()
                    ),
                );
            }
            AcquireOutcome::Acquired { .. } => {}
        }

        self.board.mark_started(run_id, trigger, now);

        let (relay, receiver) = LogRelay::channel();
        let board = Arc::clone(&self.board);
        let lock = Arc::clone(&self.lock);
        let pump = thread::Builder::new()
            .name("archive-relay".to_string())
            .spawn(move || pump_relay(run_id, trigger, receiver, &board, &lock));
        if let Err(e) = pump {
            let error = WorkerError::SpawnFailed(e.to_string());
            self.board
                .log(LogLevel::Error, &format!("Failed to start archive run: {}", error));
            finish_run(&self.board, &self.lock, &RunReport::failed(run_id, trigger, error));
            return false;
        }

        // On failure the relay is dropped and the pump records the run as failed.
        match spawn_run(job, Arc::clone(&self.factory), relay) {
            Ok(_detached) => true,
            Err(e) => {
                self.board
                    .log(LogLevel::Error, &format!("Failed to start archive run: {}", e));
                false
            }
        }
    }

    fn start_retention(&self, policy: RetentionPolicy) {
        if !policy.is_enabled() {
            self.board
                .log(LogLevel::Info, "Retention requested but no limits are configured");
            return;
        }
        if self
            .retention_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.board
                .log(LogLevel::Warn, "Previous retention pass still running; skipping");
            return;
        }

        let board = Arc::clone(&self.board);
        let running = Arc::clone(&self.retention_running);
        let root = PathBuf::from(&self.config.archive.output_dir);

        let spawned = thread::Builder::new()
            .name("retention".to_string())
            .spawn(move || {
                let report = RetentionEngine::new(LocalArchiveFs::new(&root), policy).apply(Utc::now());
                board.log(
                    LogLevel::Info,
                    &format!(
                        "Retention pass: deleted {} file(s), freed {} bytes, {} bytes remain",
                        report.files_deleted(),
                        report.bytes_freed,
                        report.bytes_remaining
                    ),
                );
                board.record_retention(report);
                running.store(false, Ordering::Release);
            });

        if let Err(e) = spawned {
            self.retention_running.store(false, Ordering::Release);
            self.board.log(
                LogLevel::Error,
                &format!("Failed to start retention pass: {}", e),
            );
        }
    }
}

/// Applies one run's relay traffic to the board until its final report.
fn pump_relay(
    run_id: uuid::Uuid,
    trigger: RunTrigger,
    receiver: RelayReceiver,
    board: &StatusBoard,
    lock: &RunLockSlot,
) {
    for message in receiver.iter() {
        match message {
            RelayMessage::Log(event) => board.record_log(event),
            RelayMessage::Airport { code, counts } => board.record_airport(run_id, &code, counts),
            RelayMessage::Finished(report) => {
                finish_run(board, lock, &report);
                return;
            }
        }
    }

    let error = RunError::Worker(WorkerError::ChannelClosed);
    board.log(
        LogLevel::Error,
        &format!("Archive run {} ended without a report: {}", run_id, error),
    );
    finish_run(board, lock, &RunReport::failed(run_id, trigger, error));
}

fn finish_run(board: &StatusBoard, lock: &RunLockSlot, report: &RunReport) {
    if !board.record_finished(report) {
        board.log(
            LogLevel::Warn,
            &format!(
                "Run {} finished after its lock was cleared as stale",
                report.run_id
            ),
        );
    }
    lock.release(report.run_id);
}

/// Status and control surface of a running orchestrator.
pub struct OrchestratorHandle {
    control: broadcast::Sender<ControlSignal>,
    board: Arc<StatusBoard>,
    lock: Arc<RunLockSlot>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OrchestratorHandle {
    pub fn snapshot(&self) -> RunStatus {
        self.board.snapshot()
    }

    pub fn recent_logs(&self, n: usize) -> Vec<LogEvent> {
        self.board.recent_logs(n)
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.board.subscribe()
    }

    /// Asks for a manual run. It is skipped like any other trigger if a run
    /// is already in progress.
    pub fn request_run(&self) -> bool {
        self.control.send(ControlSignal::RunNow).is_ok()
    }

    pub fn request_retention(&self) -> bool {
        self.control.send(ControlSignal::RetentionNow).is_ok()
    }

    pub fn is_run_active(&self) -> bool {
        self.lock.is_held()
    }

    /// Waits until no run holds the lock. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.lock.is_held() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        true
    }

    /// Stops the scheduler loop and joins its thread. An in-flight run is
    /// left to finish on its own thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the select loop so it sees the flag
        let _ = self.control.send(ControlSignal::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
    }
}

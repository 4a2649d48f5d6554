//! Run status and recent log events, as shown to status readers.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broadcast::{LogBroadcaster, LogBuffer, LogEvent, LogLevel};
use crate::retention::RetentionReport;
use crate::worker::{AirportCounts, RunOutcome, RunReport, RunStats, RunTrigger};

/// Target for the orchestrator's own log events.
pub const ORCHESTRATOR_TARGET: &str = "wxarchiver::orchestrator";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// The last run could not start or failed outright.
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub trigger: Option<RunTrigger>,
    pub holder_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
    pub last_stats: Option<RunStats>,
    /// Counts of the in-progress run, or of the last one.
    pub per_airport: BTreeMap<String, AirportCounts>,
    /// Runs finished since startup, whatever their outcome.
    pub run_count: u64,
    /// Triggers dropped because a run was already in progress.
    pub skipped_triggers: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_retention: Option<RetentionReport>,
}

/// Shared state between the orchestrator, its relay pumps and status
/// readers. Only the orchestrator side writes.
pub struct StatusBoard {
    status: RwLock<RunStatus>,
    logs: Mutex<LogBuffer>,
    broadcaster: LogBroadcaster,
}

impl StatusBoard {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            status: RwLock::new(RunStatus::default()),
            logs: Mutex::new(LogBuffer::new(log_capacity)),
            broadcaster: LogBroadcaster::default(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RunStatus> {
        self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunStatus> {
        self.status.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RunStatus {
        self.read().clone()
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent_logs(&self, n: usize) -> Vec<LogEvent> {
        self.buffer().recent(n)
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.buffer().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.broadcaster.subscribe()
    }

    pub fn record_log(&self, event: LogEvent) {
        self.buffer().push(event.clone());
        self.broadcaster.send(event);
    }

    /// Logs an orchestrator event through tracing and into the buffer.
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: ORCHESTRATOR_TARGET, "{}", message),
            LogLevel::Info => tracing::info!(target: ORCHESTRATOR_TARGET, "{}", message),
            LogLevel::Warn => tracing::warn!(target: ORCHESTRATOR_TARGET, "{}", message),
            LogLevel::Error => tracing::error!(target: ORCHESTRATOR_TARGET, "{}", message),
        }
        self.record_log(LogEvent::new(level, ORCHESTRATOR_TARGET, message));
    }

    pub fn mark_started(&self, holder_id: Uuid, trigger: RunTrigger, at: DateTime<Utc>) {
        let mut status = self.write();
        status.state = RunState::Running;
        status.trigger = Some(trigger);
        status.holder_id = Some(holder_id);
        status.started_at = Some(at);
        status.per_airport.clear();
    }

    /// Ignored unless `holder_id` is the run currently shown.
    pub fn record_airport(&self, holder_id: Uuid, code: &str, counts: AirportCounts) {
        let mut status = self.write();
        if status.holder_id == Some(holder_id) {
            status.per_airport.insert(code.to_string(), counts);
        }
    }

    /// Applies a finished run. Returns false for a run that is no longer
    /// the one shown (its lock was cleared as stale), which only bumps
    /// the run count.
    pub fn record_finished(&self, report: &RunReport) -> bool {
        let mut status = self.write();
        status.run_count += 1;
        if status.holder_id != Some(report.run_id) {
            return false;
        }

        status.state = match report.outcome {
            RunOutcome::Completed | RunOutcome::TimedOut => RunState::Idle,
            RunOutcome::Failed => RunState::Error,
        };
        status.holder_id = None;
        status.last_outcome = Some(report.outcome);
        status.last_error = report.error.clone();
        status.last_stats = Some(report.stats.clone());
        if report.outcome != RunOutcome::Failed {
            status.last_completed_at = Some(report.finished_at);
            status.per_airport = report.per_airport.clone();
        }
        if let Some(retention) = &report.retention {
            status.last_retention = Some(retention.clone());
        }
        true
    }

    pub fn record_skipped(&self) {
        self.write().skipped_triggers += 1;
    }

    pub fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        self.write().next_run_at = at;
    }

    pub fn record_retention(&self, report: RetentionReport) {
        self.write().last_retention = Some(report);
    }
}

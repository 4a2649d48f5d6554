//! One-way channel from a running archive job back to the orchestrator.
//!
//! Delivery is best effort and in emission order: the sender never blocks and
//! never learns whether anyone is listening.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::broadcast::log_broadcaster::{LogEvent, LogLevel};
use crate::worker::{AirportCounts, RunReport};

/// Target attached to run narrative events.
pub const RUN_TARGET: &str = "wxarchiver::worker";

#[derive(Debug, Clone)]
pub enum RelayMessage {
    Log(LogEvent),
    /// An airport finished; its counts for this run.
    Airport { code: String, counts: AirportCounts },
    /// The run is over. Always the last message of a run.
    Finished(Box<RunReport>),
}

#[derive(Debug, Clone)]
pub struct LogRelay {
    sender: Sender<RelayMessage>,
}

impl LogRelay {
    pub fn channel() -> (LogRelay, RelayReceiver) {
        let (sender, receiver) = unbounded();
        (LogRelay { sender }, RelayReceiver { receiver })
    }

    /// A relay nobody listens to, for direct runs.
    pub fn detached() -> LogRelay {
        let (relay, _receiver) = Self::channel();
        relay
    }

    pub fn send(&self, message: RelayMessage) {
        // Ignore errors - a gone orchestrator must not stop the run
        let _ = self.sender.send(message);
    }

    /// Logs through tracing and forwards the same line over the relay.
    pub fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: RUN_TARGET, "{}", message),
            LogLevel::Info => tracing::info!(target: RUN_TARGET, "{}", message),
            LogLevel::Warn => tracing::warn!(target: RUN_TARGET, "{}", message),
            LogLevel::Error => tracing::error!(target: RUN_TARGET, "{}", message),
        }
        self.send(RelayMessage::Log(LogEvent::new(level, RUN_TARGET, message)));
    }

    pub fn info(&self, message: &str) {
        self.emit(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(LogLevel::Error, message);
    }

    pub fn airport(&self, code: &str, counts: AirportCounts) {
        self.send(RelayMessage::Airport {
            code: code.to_string(),
            counts,
        });
    }

    pub fn finished(&self, report: RunReport) {
        self.send(RelayMessage::Finished(Box::new(report)));
    }
}

pub struct RelayReceiver {
    receiver: Receiver<RelayMessage>,
}

impl RelayReceiver {
    /// Errors on timeout, or once every relay has been dropped.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<RelayMessage, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_iter(&self) -> impl Iterator<Item = RelayMessage> + '_ {
        self.receiver.try_iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = RelayMessage> + '_ {
        self.receiver.iter()
    }
}

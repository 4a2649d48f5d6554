//! Log events from archive runs: the worker-to-orchestrator relay, the
//! bounded buffer kept for status readers, and live fan-out.

pub mod log_broadcaster;
pub mod log_buffer;
pub mod log_relay;

pub use log_broadcaster::{LogBroadcaster, LogEvent, LogLevel};
pub use log_buffer::LogBuffer;
pub use log_relay::{LogRelay, RelayMessage, RelayReceiver, RUN_TARGET};

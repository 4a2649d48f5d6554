//! Run scheduling, the run lock and the status surface.

pub mod daily;
pub mod run_lock;
pub mod scheduler;
pub mod status;

pub use run_lock::{AcquireOutcome, RunLock, RunLockSlot};
pub use scheduler::{ControlSignal, Orchestrator, OrchestratorHandle};
pub use status::{RunState, RunStatus, StatusBoard, ORCHESTRATOR_TARGET};

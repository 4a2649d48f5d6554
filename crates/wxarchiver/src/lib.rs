pub mod broadcast;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod retention;
pub mod sanitize;
pub mod source;
pub mod storage;
pub mod worker;

pub use broadcast::{LogBroadcaster, LogEvent, LogLevel, LogRelay};
pub use config::{load_config, resolve_config_path, Config};
pub use error::{
    ArchiverError, ConfigError, Result, RunError, SourceError, StorageError, WorkerError,
};
pub use orchestrator::{Orchestrator, OrchestratorHandle, RunLockSlot, RunState, RunStatus};
pub use retention::{RetentionEngine, RetentionPolicy, RetentionReport};
pub use source::{HttpSource, WebcamSource};
pub use storage::{ArchiveStore, CameraTarget, FrameRef};
pub use worker::{
    http_source_factory, spawn_run, RunJob, RunOutcome, RunReport, RunTrigger, SourceFactory,
};

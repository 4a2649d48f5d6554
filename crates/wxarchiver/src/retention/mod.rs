pub mod engine;
pub mod fs;

pub use engine::{RetentionEngine, RetentionPolicy, RetentionReport};
pub use fs::{ArchiveFile, ArchiveFs, LocalArchiveFs};

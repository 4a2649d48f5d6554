pub mod archive;
pub mod layout;

pub use archive::{AirportMetadata, ArchiveStore};
pub use layout::{CameraTarget, FrameRef};

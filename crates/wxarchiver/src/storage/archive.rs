use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage::layout::{canonical_frame_path, metadata_path, CameraTarget, FrameRef};

/// Contents of `<AIRPORT>/metadata.json`, rewritten on every run.
#[derive(Debug, Clone, Serialize)]
pub struct AirportMetadata {
    pub airport: serde_json::Value,
    pub api_response: serde_json::Value,
    pub last_updated: DateTime<Utc>,
}

/// The on-disk archive tree. Existence of a frame's canonical path is the
/// only record that it has been archived.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the archive root if needed and proves it accepts new files.
    pub fn ensure_writable(&self) -> Result<(), StorageError> {
        self.ensure_directory(&self.root)?;
        NamedTempFile::new_in(&self.root)
            .map(drop)
            .map_err(|e| StorageError::RootUnwritable {
                path: self.root.clone(),
                source: e,
            })
    }

    pub fn frame_path(&self, camera: &CameraTarget, frame: &FrameRef) -> PathBuf {
        canonical_frame_path(&self.root, camera, frame)
    }

    pub fn contains(&self, camera: &CameraTarget, frame: &FrameRef) -> bool {
        self.frame_path(camera, frame).is_file()
    }

    /// Writes a frame to its canonical path. The file only appears there once
    /// it is complete; its mtime is set to the frame's capture time.
    pub fn store_frame(
        &self,
        camera: &CameraTarget,
        frame: &FrameRef,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.frame_path(camera, frame);
        let modified: SystemTime = frame.captured_at().into();
        self.write_atomic(&path, content, Some(modified))?;
        debug!("Stored {} ({} bytes)", path.display(), content.len());
        Ok(path)
    }

    pub fn write_metadata(
        &self,
        airport_code: &str,
        metadata: &AirportMetadata,
    ) -> Result<PathBuf, StorageError> {
        let path = metadata_path(&self.root, airport_code);
        let json = serde_json::to_vec_pretty(metadata)?;
        self.write_atomic(&path, &json, None)?;
        Ok(path)
    }

    /// Temp file in the destination directory, then rename into place.
    fn write_atomic(
        &self,
        path: &Path,
        content: &[u8],
        modified: Option<SystemTime>,
    ) -> Result<(), StorageError> {
        let dir = path.parent().unwrap_or(&self.root);
        self.ensure_directory(dir)?;

        let write_err = |source| StorageError::WriteFile {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(content).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(write_err)?;
        }

        if let Some(modified) = modified {
            tmp.as_file().set_modified(modified).map_err(write_err)?;
        }

        tmp.persist(path).map_err(|e| StorageError::PersistFile {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.is_dir() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

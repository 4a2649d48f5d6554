//! Archive tree layout.
//!
//! ```text
//! <output_dir>/<AIRPORT>/<YYYY>/<MM>/<DD>/<camera>/<filename>
//! <output_dir>/<AIRPORT>/metadata.json
//! ```
//!
//! Filenames are pure functions of a [`FrameRef`], so the existence of the
//! canonical path is all that is needed to know a frame is archived.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::sanitize::{camera_fallback_name, sanitize_camera_name};

pub const METADATA_FILENAME: &str = "metadata.json";

const DEFAULT_EXTENSION: &str = "jpg";
/// Directory for live snapshots of a camera the source did not name.
pub const CURRENT_FALLBACK_DIR: &str = "current";
const CURRENT_PREFIX_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One webcam of one airport, as resolved for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraTarget {
    pub airport_code: String,
    pub index: u32,
    /// Display name as reported by the source.
    pub name: Option<String>,
    /// Sanitized directory name; part of the camera's identity.
    pub dir_name: String,
    /// Where live snapshots go. Same as `dir_name` for named cameras.
    pub current_dir_name: String,
    pub image_url: Option<String>,
    pub history_url: Option<String>,
}

impl CameraTarget {
    pub fn new(airport_code: &str, index: u32, name: Option<&str>) -> Self {
        let name_or_empty = name.unwrap_or_default();
        let dir_name = sanitize_camera_name(name_or_empty, &camera_fallback_name(index));
        let current_dir_name = sanitize_camera_name(name_or_empty, CURRENT_FALLBACK_DIR);
        Self {
            airport_code: airport_code.to_uppercase(),
            index,
            name: name.map(str::to_string),
            dir_name,
            current_dir_name,
            image_url: None,
            history_url: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_history_url(mut self, url: impl Into<String>) -> Self {
        self.history_url = Some(url.into());
        self
    }

    pub fn has_history(&self) -> bool {
        self.history_url.is_some()
    }

    /// Directory `frame` is archived under.
    pub fn dir_for(&self, frame: &FrameRef) -> &str {
        match frame {
            FrameRef::History { .. } => &self.dir_name,
            FrameRef::Current { .. } => &self.current_dir_name,
        }
    }

    /// Stable ordering key used to break ties between frames of equal age.
    pub fn identity(&self) -> (&str, &str, u32) {
        (&self.airport_code, &self.dir_name, self.index)
    }
}

/// One remote image, identified well enough to name its archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRef {
    /// The camera's live snapshot, named after the run's capture time.
    Current {
        captured_at: DateTime<Utc>,
        url: String,
    },
    /// A frame from the source's history window.
    History {
        timestamp: i64,
        camera_index: u32,
        url: String,
    },
}

impl FrameRef {
    pub fn url(&self) -> &str {
        match self {
            FrameRef::Current { url, .. } | FrameRef::History { url, .. } => url,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            FrameRef::Current { captured_at, .. } => *captured_at,
            FrameRef::History { timestamp, .. } => {
                Utc.timestamp_opt(*timestamp, 0).single().unwrap_or_default()
            }
        }
    }

    /// History timestamp, or `None` for a current snapshot (which sorts last).
    pub fn history_timestamp(&self) -> Option<i64> {
        match self {
            FrameRef::History { timestamp, .. } => Some(*timestamp),
            FrameRef::Current { .. } => None,
        }
    }

    /// Deterministic archive filename for this frame.
    pub fn filename(&self) -> String {
        match self {
            FrameRef::History {
                timestamp,
                camera_index,
                ..
            } => format!("{}_{}.{}", timestamp, camera_index, DEFAULT_EXTENSION),
            FrameRef::Current { captured_at, url } => {
                let prefix = captured_at.format(CURRENT_PREFIX_FORMAT);
                let basename = url_basename(url).unwrap_or("image");
                if has_extension(basename) {
                    format!("{}_{}", prefix, basename)
                } else {
                    format!("{}_{}.{}", prefix, basename, DEFAULT_EXTENSION)
                }
            }
        }
    }
}

/// Directory of an airport inside the archive root.
pub fn airport_dir(root: &Path, airport_code: &str) -> PathBuf {
    root.join(airport_code.to_uppercase())
}

pub fn metadata_path(root: &Path, airport_code: &str) -> PathBuf {
    airport_dir(root, airport_code).join(METADATA_FILENAME)
}

/// Path of `frame` relative to the archive root.
pub fn relative_frame_path(camera: &CameraTarget, frame: &FrameRef) -> PathBuf {
    let captured = frame.captured_at();
    PathBuf::from(camera.airport_code.to_uppercase())
        .join(captured.format("%Y").to_string())
        .join(captured.format("%m").to_string())
        .join(captured.format("%d").to_string())
        .join(camera.dir_for(frame))
        .join(frame.filename())
}

pub fn canonical_frame_path(root: &Path, camera: &CameraTarget, frame: &FrameRef) -> PathBuf {
    root.join(relative_frame_path(camera, frame))
}

/// Capture time encoded in an archive filename, if it follows either
/// naming convention.
pub fn embedded_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    let stem = filename.rsplit_once('.').map_or(filename, |(s, _)| s);

    // <unix_timestamp>_<camera_index>
    if let Some((ts, idx)) = stem.split_once('_') {
        if !idx.contains('_') && is_digits(ts) && is_digits(idx) {
            let secs: i64 = ts.parse().ok()?;
            return Utc.timestamp_opt(secs, 0).single();
        }
    }

    // YYYYMMDD_HHMMSS_<label>
    let prefix = stem.get(..15)?;
    NaiveDateTime::parse_from_str(prefix, CURRENT_PREFIX_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn url_path(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.find("://") {
        Some(scheme_end) => {
            let rest = &without_query[scheme_end + 3..];
            rest.find('/').map_or("", |slash| &rest[slash..])
        }
        None => without_query,
    }
}

fn url_basename(url: &str) -> Option<&str> {
    url_path(url).rsplit('/').next().filter(|s| !s.is_empty())
}

fn has_extension(basename: &str) -> bool {
    basename
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

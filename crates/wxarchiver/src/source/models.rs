//! Types exchanged with the remote imagery source.

use async_trait::async_trait;
use log::warn;
use serde_json::Value;

use crate::error::SourceError;
use crate::storage::CameraTarget;

/// Requests per minute granted to clients without a working API key.
pub const ANONYMOUS_REQUESTS_PER_MINUTE: u32 = 100;

/// One airport as listed by the source.
#[derive(Debug, Clone, PartialEq)]
pub struct AirportSummary {
    /// Upper-cased airport code.
    pub code: String,
    /// The listing entry exactly as received; written to `metadata.json`.
    pub raw: Value,
}

impl AirportSummary {
    /// Builds a summary from a listing entry. The code is taken from `code`,
    /// then `id`, then `icao`; entries without any are dropped.
    pub fn from_value(raw: Value) -> Option<Self> {
        let code = ["code", "id", "icao"]
            .iter()
            .filter_map(|key| raw.get(key).and_then(Value::as_str))
            .map(str::trim)
            .find(|code| !code.is_empty())?
            .to_uppercase();
        Some(Self { code, raw })
    }

    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_uppercase(),
            raw: serde_json::json!({ "code": code.to_uppercase() }),
        }
    }
}

/// One webcam of an airport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webcam {
    pub index: u32,
    pub name: Option<String>,
    /// Absolute URL of the live snapshot.
    pub image_url: Option<String>,
    /// Absolute URL of the history listing; `None` when history is disabled.
    pub history_url: Option<String>,
}

impl Webcam {
    pub fn to_camera_target(&self, airport_code: &str) -> CameraTarget {
        let mut camera = CameraTarget::new(airport_code, self.index, self.name.as_deref());
        camera.image_url = self.image_url.clone();
        camera.history_url = self.history_url.clone();
        camera
    }
}

/// Webcams of one airport plus the raw response they were read from.
#[derive(Debug, Clone, PartialEq)]
pub struct WebcamListing {
    pub webcams: Vec<Webcam>,
    pub raw: Value,
}

/// One frame advertised by a camera's history endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFrame {
    pub timestamp: i64,
    pub url: String,
}

/// What the source said about its request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitProbe {
    /// The source advertised a per-minute limit for this client.
    Advertised(u32),
    /// No usable limit was advertised; `key_rejected` is set when the
    /// configured API key was refused.
    Anonymous { key_rejected: bool },
}

impl RateLimitProbe {
    pub fn requests_per_minute(&self) -> u32 {
        match self {
            RateLimitProbe::Advertised(limit) => *limit,
            RateLimitProbe::Anonymous { .. } => ANONYMOUS_REQUESTS_PER_MINUTE,
        }
    }
}

/// Which airports a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AirportSelection {
    pub archive_all: bool,
    pub selected: Vec<String>,
}

impl AirportSelection {
    pub fn all() -> Self {
        Self {
            archive_all: true,
            selected: Vec::new(),
        }
    }

    pub fn only<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            archive_all: false,
            selected: codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_uppercase())
                .collect(),
        }
    }

    /// Filters the source's listing down to the selected airports, sorted by
    /// code. Selected codes the source does not list are reported.
    pub fn apply(&self, listing: Vec<AirportSummary>) -> Vec<AirportSummary> {
        let mut chosen: Vec<AirportSummary> = if self.archive_all {
            listing
        } else {
            let chosen: Vec<AirportSummary> = listing
                .into_iter()
                .filter(|a| self.selected.iter().any(|s| s.eq_ignore_ascii_case(&a.code)))
                .collect();
            let missing: Vec<&str> = self
                .selected
                .iter()
                .filter(|s| !chosen.iter().any(|a| a.code.eq_ignore_ascii_case(s)))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                warn!(
                    "Selected airport(s) not found in source listing: {}",
                    missing.join(", ")
                );
            }
            chosen
        };
        chosen.sort_by(|a, b| a.code.cmp(&b.code));
        chosen.dedup_by(|a, b| a.code == b.code);
        chosen
    }
}

/// The remote imagery API as seen by a run. Every call may fail with a
/// distinguishable not-found, rate-limited or transport outcome.
#[async_trait]
pub trait WebcamSource: Send + Sync {
    /// Asks the source for this client's request budget.
    async fn probe_rate_limit(&self) -> Result<RateLimitProbe, SourceError>;

    async fn list_airports(&self) -> Result<Vec<AirportSummary>, SourceError>;

    async fn list_webcams(&self, airport_code: &str) -> Result<WebcamListing, SourceError>;

    /// History frames of one camera, oldest first.
    async fn list_history(&self, camera: &CameraTarget) -> Result<Vec<HistoryFrame>, SourceError>;

    /// Downloads one image.
    async fn fetch_frame(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}

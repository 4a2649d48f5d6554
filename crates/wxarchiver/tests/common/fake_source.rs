//! In-memory `WebcamSource` with failure injection.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use wxarchiver::error::SourceError;
use wxarchiver::source::{
    AirportSummary, HistoryFrame, RateLimitProbe, Webcam, WebcamListing, WebcamSource,
};
use wxarchiver::storage::CameraTarget;

/// A camera as the fake source advertises it.
#[derive(Debug, Clone)]
pub struct FakeCamera {
    pub name: Option<String>,
    /// History timestamps; `None` for a camera without history support.
    pub history: Option<Vec<i64>>,
}

impl FakeCamera {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            history: None,
        }
    }

    pub fn unnamed() -> Self {
        Self {
            name: None,
            history: None,
        }
    }

    pub fn with_history(mut self, timestamps: &[i64]) -> Self {
        self.history = Some(timestamps.to_vec());
        self
    }
}

pub fn current_url(code: &str, index: usize) -> String {
    format!("https://fake.test/{}/{}/current.jpg", code, index)
}

pub fn history_url(code: &str, index: usize) -> String {
    format!("https://fake.test/{}/{}/history", code, index)
}

pub fn frame_url(code: &str, index: usize, timestamp: i64) -> String {
    format!("https://fake.test/{}/{}/{}.jpg", code, index, timestamp)
}

pub struct FakeSource {
    probe: Result<RateLimitProbe, SourceError>,
    airports: Vec<(String, Vec<FakeCamera>)>,
    broken_listings: HashSet<String>,
    failing_urls: HashMap<String, SourceError>,
    airport_list_error: Option<SourceError>,
    fetched: Mutex<Vec<String>>,
    requests: Mutex<usize>,
}

impl FakeSource {
    /// A source advertising `requests_per_minute`.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            probe: Ok(RateLimitProbe::Advertised(requests_per_minute)),
            airports: Vec::new(),
            broken_listings: HashSet::new(),
            failing_urls: HashMap::new(),
            airport_list_error: None,
            fetched: Mutex::new(Vec::new()),
            requests: Mutex::new(0),
        }
    }

    /// A source fast enough that pacing never matters in real time.
    pub fn fast() -> Self {
        Self::new(1_000_000)
    }

    pub fn airport(mut self, code: &str, cameras: Vec<FakeCamera>) -> Self {
        self.airports.push((code.to_string(), cameras));
        self
    }

    /// The airport's webcam listing fails with a 500.
    pub fn broken_listing(mut self, code: &str) -> Self {
        self.broken_listings.insert(code.to_string());
        self
    }

    pub fn failing_url(mut self, url: &str, error: SourceError) -> Self {
        self.failing_urls.insert(url.to_string(), error);
        self
    }

    pub fn airport_list_error(mut self, error: SourceError) -> Self {
        self.airport_list_error = Some(error);
        self
    }

    /// Every frame URL requested, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Every request of any kind, the probe excluded.
    pub fn request_count(&self) -> usize {
        *self.requests.lock().unwrap()
    }

    fn count(&self) {
        *self.requests.lock().unwrap() += 1;
    }

    /// Body served for a frame; unique per URL.
    pub fn body_for(url: &str) -> Vec<u8> {
        format!("JPEG:{}", url).into_bytes()
    }
}

#[async_trait]
impl WebcamSource for FakeSource {
    async fn probe_rate_limit(&self) -> Result<RateLimitProbe, SourceError> {
        self.probe.clone()
    }

    async fn list_airports(&self) -> Result<Vec<AirportSummary>, SourceError> {
        self.count();
        if let Some(error) = &self.airport_list_error {
            return Err(error.clone());
        }
        Ok(self
            .airports
            .iter()
            .map(|(code, _)| AirportSummary::new(code))
            .collect())
    }

    async fn list_webcams(&self, airport_code: &str) -> Result<WebcamListing, SourceError> {
        self.count();
        if self.broken_listings.contains(airport_code) {
            return Err(SourceError::Http {
                status: 500,
                url: format!("https://fake.test/{}/webcams", airport_code),
            });
        }
        let (_, cameras) = self
            .airports
            .iter()
            .find(|(code, _)| code == airport_code)
            .ok_or_else(|| SourceError::NotFound {
                url: airport_code.to_string(),
            })?;

        let webcams = cameras
            .iter()
            .enumerate()
            .map(|(index, camera)| Webcam {
                index: index as u32,
                name: camera.name.clone(),
                image_url: Some(current_url(airport_code, index)),
                history_url: camera
                    .history
                    .as_ref()
                    .map(|_| history_url(airport_code, index)),
            })
            .collect();

        Ok(WebcamListing {
            webcams,
            raw: json!({ "webcams": cameras.len() }),
        })
    }

    async fn list_history(&self, camera: &CameraTarget) -> Result<Vec<HistoryFrame>, SourceError> {
        self.count();
        let index = camera.index as usize;
        let timestamps = self
            .airports
            .iter()
            .find(|(code, _)| *code == camera.airport_code)
            .and_then(|(_, cameras)| cameras.get(index))
            .and_then(|c| c.history.clone())
            .unwrap_or_default();
        Ok(timestamps
            .into_iter()
            .map(|timestamp| HistoryFrame {
                timestamp,
                url: frame_url(&camera.airport_code, index, timestamp),
            })
            .collect())
    }

    async fn fetch_frame(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        self.count();
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(error) = self.failing_urls.get(url) {
            return Err(error.clone());
        }
        Ok(Self::body_for(url))
    }
}

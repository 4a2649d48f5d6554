//! reqwest-backed [`WebcamSource`] for the AviationWX API.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::sanitize::redact_url;
use crate::source::models::{
    AirportSummary, HistoryFrame, RateLimitProbe, Webcam, WebcamListing, WebcamSource,
};
use crate::storage::CameraTarget;

const API_KEY_HEADER: &str = "X-API-Key";
const RATE_LIMIT_HEADER: &str = "X-RateLimit-Limit";
const CONTENT_DIGEST_HEADER: &str = "Content-Digest";
const IMAGE_URL_KEYS: &[&str] = &["image_url", "url", "src", "snapshot_url"];
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpSource {
    client: Client,
    airports_url: String,
    api_base: String,
    api_key: Option<SecretString>,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SourceError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = Some(config.api_key.trim())
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::from(key.to_string()));

        Ok(Self {
            client,
            airports_url: config.airports_api_url.trim().to_string(),
            api_base: api_base(&config.airports_api_url),
            api_key,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("wxarchiver/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key.expose_secret()) {
                headers.insert(API_KEY_HEADER, value);
            }
        }
        headers
    }

    async fn get(&self, url: &str) -> Result<Response, SourceError> {
        debug!("GET {}", redact_url(url));
        let response = self.client.get(url).headers(self.headers()).send().await?;
        check_status(response, url)
    }

    async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        let response = self.get(url).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("{}: {}", redact_url(url), e)))
    }
}

#[async_trait]
impl WebcamSource for HttpSource {
    async fn probe_rate_limit(&self) -> Result<RateLimitProbe, SourceError> {
        let url = status_url(&self.airports_url);
        if url.is_empty() {
            return Err(SourceError::InvalidResponse(
                "Could not derive status URL".to_string(),
            ));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await?;

        let limit = response
            .headers()
            .get(RATE_LIMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|limit| *limit > 0);

        match (response.status().is_success(), limit) {
            (true, Some(limit)) => Ok(RateLimitProbe::Advertised(limit)),
            _ => {
                let key_rejected = response.status() == StatusCode::UNAUTHORIZED;
                if key_rejected {
                    info!("API key invalid or rejected; using anonymous rate limit");
                }
                Ok(RateLimitProbe::Anonymous { key_rejected })
            }
        }
    }

    async fn list_airports(&self) -> Result<Vec<AirportSummary>, SourceError> {
        let data = self.get_json(&self.airports_url).await?;
        let airports = parse_airport_list(data)?;
        debug!("Fetched {} airports from source", airports.len());
        Ok(airports)
    }

    async fn list_webcams(&self, airport_code: &str) -> Result<WebcamListing, SourceError> {
        let url = format!("{}/airports/{}/webcams", self.api_base, airport_code);
        let data = self.get_json(&url).await?;
        parse_webcam_listing(data, &self.api_base)
    }

    async fn list_history(&self, camera: &CameraTarget) -> Result<Vec<HistoryFrame>, SourceError> {
        let Some(history_url) = camera.history_url.as_deref() else {
            return Ok(Vec::new());
        };
        let data = self.get_json(history_url).await?;
        parse_history_frames(&data, &self.api_base)
    }

    async fn fetch_frame(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.get(url).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(SourceError::InvalidResponse(format!(
                "{} is not an image (content-type: {})",
                redact_url(url),
                content_type
            )));
        }

        let digest = response
            .headers()
            .get(CONTENT_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_digest);

        let body = response.bytes().await?;

        if let Some(digest) = digest {
            if !digest.matches(&body) {
                return Err(SourceError::IntegrityMismatch {
                    url: redact_url(url),
                    algorithm: digest.algorithm.name().to_string(),
                });
            }
        }

        Ok(body.to_vec())
    }
}

fn check_status(response: Response, url: &str) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = redact_url(url);
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(SourceError::NotFound { url }),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(SourceError::RateLimited { url, retry_after })
        }
        _ => Err(SourceError::Http {
            status: status.as_u16(),
            url,
        }),
    }
}

/// `https://host/v1/airports` → `https://host/v1`.
pub fn api_base(airports_url: &str) -> String {
    let trimmed = airports_url.trim().trim_end_matches('/');
    match trimmed.rsplit_once("/airports") {
        Some((base, _)) => base.to_string(),
        None => trimmed.to_string(),
    }
}

/// Status endpoint used for the rate-limit probe.
pub fn status_url(airports_url: &str) -> String {
    let url = airports_url.trim();
    if url.contains("/airports") {
        return url.replacen("/airports", "/status", 1);
    }
    match url.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !url.is_empty() => format!("{}/status", parent),
        _ => String::new(),
    }
}

/// Resolves a possibly relative URL from the API against `api_base`.
pub fn absolute_url(value: &str, api_base: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") {
        return value.to_string();
    }
    if value.starts_with('/') {
        let origin_end = api_base
            .find("://")
            .and_then(|scheme| {
                api_base[scheme + 3..]
                    .find('/')
                    .map(|slash| scheme + 3 + slash)
            })
            .unwrap_or(api_base.len());
        return format!("{}{}", &api_base[..origin_end], value);
    }
    format!("{}/{}", api_base.trim_end_matches('/'), value)
}

/// Accepts a bare list or an object wrapping it under `airports` or `data`.
pub fn parse_airport_list(data: Value) -> Result<Vec<AirportSummary>, SourceError> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("airports").or_else(|| map.remove("data")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SourceError::InvalidResponse(
                    "Airport listing has no airport list".to_string(),
                ))
            }
        },
        _ => {
            return Err(SourceError::InvalidResponse(
                "Airport listing is not a list or object".to_string(),
            ))
        }
    };
    Ok(items
        .into_iter()
        .filter_map(AirportSummary::from_value)
        .collect())
}

pub fn parse_webcam_listing(data: Value, api_base: &str) -> Result<WebcamListing, SourceError> {
    let items = data
        .get("webcams")
        .or_else(|| data.get("data"))
        .or(Some(&data))
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::InvalidResponse("Webcam listing is not a list".to_string()))?;

    let webcams = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_object())
        .map(|(position, item)| parse_webcam(item, position as u32, api_base))
        .collect();

    Ok(WebcamListing { webcams, raw: data })
}

fn parse_webcam(item: &Value, position: u32, api_base: &str) -> Webcam {
    let index = item
        .get("index")
        .and_then(Value::as_u64)
        .map_or(position, |i| i as u32);
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string);
    let image_url = IMAGE_URL_KEYS
        .iter()
        .filter_map(|key| item.get(key).and_then(Value::as_str))
        .find(|url| !url.is_empty())
        .map(|url| absolute_url(url, api_base));
    let history_enabled = item
        .get("history_enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let history_url = item
        .get("history_url")
        .and_then(Value::as_str)
        .filter(|url| history_enabled && !url.is_empty())
        .map(|url| absolute_url(url, api_base));

    Webcam {
        index,
        name,
        image_url,
        history_url,
    }
}

/// Reads `{"frames": [{"timestamp", "url"}, ...]}`, oldest first.
pub fn parse_history_frames(data: &Value, api_base: &str) -> Result<Vec<HistoryFrame>, SourceError> {
    let frames = data
        .get("frames")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::InvalidResponse("History has no frame list".to_string()))?;

    let mut result: Vec<HistoryFrame> = frames
        .iter()
        .filter_map(|frame| {
            let timestamp = frame.get("timestamp").and_then(Value::as_i64)?;
            let url = frame
                .get("url")
                .and_then(Value::as_str)
                .filter(|u| !u.is_empty())?;
            Some(HistoryFrame {
                timestamp,
                url: absolute_url(url, api_base),
            })
        })
        .collect();
    result.sort_by_key(|f| f.timestamp);
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha-256",
            DigestAlgorithm::Sha512 => "sha-512",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDigest {
    pub algorithm: DigestAlgorithm,
    pub value: Vec<u8>,
}

impl ExpectedDigest {
    pub fn matches(&self, body: &[u8]) -> bool {
        match self.algorithm {
            DigestAlgorithm::Sha256 => Sha256::digest(body).as_slice() == self.value.as_slice(),
            DigestAlgorithm::Sha512 => Sha512::digest(body).as_slice() == self.value.as_slice(),
        }
    }
}

/// Parses an RFC 9530 `Content-Digest` header, preferring sha-512.
pub fn parse_content_digest(header: &str) -> Option<ExpectedDigest> {
    let mut found: Option<ExpectedDigest> = None;
    for entry in header.split(',') {
        let Some((name, value)) = entry.trim().split_once('=') else {
            continue;
        };
        let algorithm = match name.trim().to_ascii_lowercase().as_str() {
            "sha-256" => DigestAlgorithm::Sha256,
            "sha-512" => DigestAlgorithm::Sha512,
            _ => continue,
        };
        let encoded = value.trim().trim_matches(':');
        let Ok(value) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            continue;
        };
        if found.as_ref().map_or(true, |f| f.algorithm == DigestAlgorithm::Sha256) {
            found = Some(ExpectedDigest { algorithm, value });
        }
    }
    found
}

//! The remote imagery source: the `WebcamSource` seam and its HTTP client.

pub mod http;
pub mod models;

pub use http::HttpSource;
pub use models::{
    AirportSelection, AirportSummary, HistoryFrame, RateLimitProbe, Webcam, WebcamListing,
    WebcamSource, ANONYMOUS_REQUESTS_PER_MINUTE,
};

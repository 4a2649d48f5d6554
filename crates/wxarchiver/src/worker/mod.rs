//! Archive runs: request pacing, retries, frame selection and the run itself.

pub mod rate_limit;
pub mod retry;
pub mod run;
pub mod selector;

pub use rate_limit::{delay_for_limit, RateLimiter};
pub use retry::{with_retry, RetryPolicy};
pub use run::{
    http_source_factory, run_budget, spawn_run, AirportCounts, RunJob, RunOutcome, RunReport,
    RunSettings, RunStats, RunTrigger, SourceFactory, Worker,
};
pub use selector::{AirportCandidates, FetchInstruction, FrameSelector, Selection, SelectionMode};

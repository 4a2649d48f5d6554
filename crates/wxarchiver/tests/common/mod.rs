//! Shared test utilities for wxarchiver integration tests.
//!
//! This module provides:
//! - `TestHarness` for runs against a temporary archive tree
//! - `FakeSource`, an in-memory source with failure injection
//! - `ConfigBuilder` for test configurations

pub mod builders;
pub mod fake_source;
pub mod harness;

pub use builders::*;
pub use fake_source::*;
pub use harness::{RunResult, TestHarness};

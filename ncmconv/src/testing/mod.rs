//! Testing utilities for conversion workflows.
//!
//! This module provides:
//! - A recording stub [`ConversionClient`](crate::client::ConversionClient)
//! - Fixtures for writing source files into temporary directories

mod fixtures;
mod mocks;

pub use fixtures::{sparse_source, write_source, TestWorkspace};
pub use mocks::{StubBehavior, StubConversionClient};

//! # ncmconv
//!
//! Converts encrypted NCM audio containers to MP3 by delegating the decoding
//! to a remote HTTP service.
//!
//! The crate is organised around three pieces:
//!
//! - **Staging**: uploads are validated and written under a unique token
//! - **Orchestration**: a staged source is checked, submitted once, and cleaned up
//! - **Client**: the multipart round trip that streams the decoded output to disk
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ncmconv::prelude::*;
//!
//! let config = ConverterConfig::load("ncmconv.json")?.apply_env()?;
//! let service = ConversionService::from_config(&config)?;
//!
//! let report = service.convert_file("song.ncm").await;
//! if report.success {
//!     println!("{}", report.download_url.unwrap_or_default());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod orchestrator;
pub mod outcome;
pub mod permissions;
pub mod service;
pub mod staging;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::client::{ConversionClient, HttpConversionClient};
    pub use crate::config::{ConverterConfig, DestinationNaming};
    pub use crate::errors::{ConfigError, ConversionError, ErrorKind};
    pub use crate::observability::{init_tracing, LogFormat, SpanTimer};
    pub use crate::orchestrator::ConversionOrchestrator;
    pub use crate::outcome::{
        ConversionOutcome, ConversionReceipt, ConversionReport, ConversionRequest,
    };
    pub use crate::service::ConversionService;
    pub use crate::staging::{StagedUpload, StagingArea};
}

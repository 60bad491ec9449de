//! Outbound calls to the remote conversion service.
//!
//! [`ConversionClient`] is the seam the orchestrator depends on. The production
//! implementation is [`HttpConversionClient`]; tests substitute a stub.

mod http;

use async_trait::async_trait;
use std::path::Path;

use crate::errors::ConversionError;
use crate::outcome::ConversionReceipt;

pub use http::HttpConversionClient;

/// Performs exactly one round trip that turns `source` into `dest`.
///
/// Implementations must not touch `source`, must leave `dest` untouched on
/// failure, and must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversionClient: Send + Sync {
    /// Submits `source` to the remote service and writes the decoded output to `dest`.
    async fn submit(&self, source: &Path, dest: &Path) -> Result<ConversionReceipt, ConversionError>;
}

//! Stub conversion clients for testing.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ConversionClient;
use crate::errors::ConversionError;
use crate::outcome::ConversionReceipt;

/// What a [`StubConversionClient`] does when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubBehavior {
    /// Writes the given bytes to the destination.
    Succeed(Vec<u8>),
    /// Copies the source bytes to the destination.
    Echo,
    /// Fails as if the remote service answered with this status.
    FailWithStatus(u16),
}

/// A client that records every call and never touches the network.
#[derive(Debug)]
pub struct StubConversionClient {
    behavior: Mutex<StubBehavior>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl StubConversionClient {
    /// Creates a stub with the given behavior.
    #[must_use]
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a stub that writes `body` to every destination.
    #[must_use]
    pub fn succeeding(body: impl Into<Vec<u8>>) -> Self {
        Self::new(StubBehavior::Succeed(body.into()))
    }

    /// Creates a stub that copies each source to its destination.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(StubBehavior::Echo)
    }

    /// Creates a stub that fails every call with `status`.
    #[must_use]
    pub fn failing_with_status(status: u16) -> Self {
        Self::new(StubBehavior::FailWithStatus(status))
    }

    /// Sleeps for `delay` before doing anything.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the behavior for subsequent calls.
    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Returns the number of times the stub was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns `(source, dest)` for each call, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl ConversionClient for StubConversionClient {
    async fn submit(&self, source: &Path, dest: &Path) -> Result<ConversionReceipt, ConversionError> {
        self.calls
            .lock()
            .push((source.to_path_buf(), dest.to_path_buf()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().clone();
        let body = match behavior {
            StubBehavior::Succeed(body) => body,
            StubBehavior::Echo => tokio::fs::read(source)
                .await
                .map_err(|e| ConversionError::io(format!("reading {}", source.display()), e))?,
            StubBehavior::FailWithStatus(status) => {
                return Err(ConversionError::RemoteStatus { status })
            }
        };

        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| ConversionError::io(format!("writing {}", dest.display()), e))?;

        Ok(ConversionReceipt {
            status: 200,
            bytes_written: body.len() as u64,
            duration_ms: 0.0,
            completed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_records_calls() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.ncm");
        let dest = dir.path().join("a.mp3");
        std::fs::write(&source, b"payload").unwrap();

        let stub = StubConversionClient::echo();
        let receipt = stub.submit(&source, &dest).await.unwrap();

        assert_eq!(receipt.bytes_written, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert_eq!(stub.calls(), vec![(source, dest)]);

        stub.reset();
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stub_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp3");

        let stub = StubConversionClient::succeeding(b"ok".to_vec());
        stub.set_behavior(StubBehavior::FailWithStatus(503));
        let err = stub.submit(&dir.path().join("a.ncm"), &dest).await.unwrap_err();

        assert!(matches!(err, ConversionError::RemoteStatus { status: 503 }));
        assert!(!dest.exists());
        assert_eq!(stub.call_count(), 1);
    }
}

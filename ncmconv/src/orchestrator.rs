//! Drives one conversion end to end.
//!
//! The orchestrator validates a staged source, delegates the round trip to a
//! [`ConversionClient`], removes the source once the converted artifact
//! exists, and turns every failure into a [`ConversionOutcome`]. Steps
//! propagate a typed [`ConversionError`]; only [`ConversionOrchestrator::convert`]
//! flattens it, so no error or panic ever escapes to the caller.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::cancellation::CancellationToken;
use crate::client::{ConversionClient, HttpConversionClient};
use crate::config::ConverterConfig;
use crate::errors::{ConfigError, ConversionError};
use crate::outcome::{ConversionOutcome, ConversionReceipt, ConversionRequest};
use crate::permissions::{normalize_permissions, PermissionOutcome};

/// Runs conversions against an injected client. Cheap to share behind an `Arc`.
pub struct ConversionOrchestrator {
    client: Arc<dyn ConversionClient>,
    max_source_bytes: u64,
}

impl std::fmt::Debug for ConversionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionOrchestrator")
            .field("max_source_bytes", &self.max_source_bytes)
            .finish_non_exhaustive()
    }
}

impl ConversionOrchestrator {
    /// Creates an orchestrator around an existing client.
    #[must_use]
    pub fn new(client: Arc<dyn ConversionClient>, config: &ConverterConfig) -> Self {
        Self {
            client,
            max_source_bytes: config.max_source_bytes,
        }
    }

    /// Creates an orchestrator backed by [`HttpConversionClient`].
    pub fn from_config(config: &ConverterConfig) -> Result<Self, ConfigError> {
        let client = HttpConversionClient::new(config)?;
        Ok(Self::new(Arc::new(client), config))
    }

    /// Converts `source` into `dest`. `outcome.success` is the boolean result.
    pub async fn convert(&self, source: &Path, dest: &Path) -> ConversionOutcome {
        self.run(&ConversionRequest::new(source, dest), None).await
    }

    /// Like [`convert`](Self::convert), but gives up as soon as `cancel` fires.
    pub async fn convert_with_cancel(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> ConversionOutcome {
        self.run(&ConversionRequest::new(source, dest), Some(cancel)).await
    }

    /// Runs a request and flattens the result into an outcome.
    pub async fn run(
        &self,
        request: &ConversionRequest,
        cancel: Option<&CancellationToken>,
    ) -> ConversionOutcome {
        let span = tracing::info_span!(
            "conversion",
            request_id = %request.request_id,
            source = %request.source.display(),
            dest = %request.dest.display(),
        );

        let attempt = AssertUnwindSafe(self.try_convert(request, cancel))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let _entered = span.enter();

        let result = attempt.unwrap_or_else(|panic| {
            Err(ConversionError::Unexpected(panic_message(panic.as_ref())))
        });

        match result {
            Ok(receipt) => {
                info!(
                    bytes_written = receipt.bytes_written,
                    duration_ms = receipt.duration_ms,
                    "Conversion succeeded"
                );
                ConversionOutcome::succeeded(
                    receipt,
                    format!("Converted file saved to {}", request.dest.display()),
                )
            }
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "Conversion failed");
                ConversionOutcome::failed(&e)
            }
        }
    }

    /// The typed workflow behind [`run`](Self::run).
    pub async fn try_convert(
        &self,
        request: &ConversionRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConversionReceipt, ConversionError> {
        let source = request.source.as_path();
        let dest = request.dest.as_path();

        if let PermissionOutcome::Ignored(reason) = normalize_in_background(source).await {
            warn!(%reason, "Permission normalization skipped");
        }

        let metadata = match tokio::fs::metadata(source).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return Err(ConversionError::NotFound {
                    path: source.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::NotFound {
                    path: source.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(ConversionError::io(format!("reading metadata of {}", source.display()), e))
            }
        };

        if metadata.len() > self.max_source_bytes {
            return Err(ConversionError::TooLarge {
                size: metadata.len(),
                limit: self.max_source_bytes,
            });
        }

        let receipt = match cancel {
            Some(token) => {
                tokio::select! {
                    result = self.client.submit(source, dest) => result?,
                    () = token.cancelled() => {
                        return Err(ConversionError::Cancelled(
                            token.reason().unwrap_or_else(|| "cancelled".to_string()),
                        ));
                    }
                }
            }
            None => self.client.submit(source, dest).await?,
        };

        // The deliverable exists at this point; failing to reclaim the source is not a failure.
        if let Err(e) = tokio::fs::remove_file(source).await {
            warn!(error = %e, "Failed to remove staged source after conversion");
        }

        Ok(receipt)
    }
}

async fn normalize_in_background(source: &Path) -> PermissionOutcome {
    let path = source.to_path_buf();
    tokio::task::spawn_blocking(move || normalize_permissions(&path))
        .await
        .unwrap_or_else(|e| PermissionOutcome::Ignored(format!("normalization task failed: {e}")))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "conversion panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockConversionClient;
    use crate::errors::ErrorKind;
    use crate::testing::StubConversionClient;
    use chrono::Utc;
    use std::time::Duration;

    fn receipt(bytes: u64) -> ConversionReceipt {
        ConversionReceipt {
            status: 200,
            bytes_written: bytes,
            duration_ms: 1.0,
            completed_at: Utc::now(),
        }
    }

    fn orchestrator(client: Arc<dyn ConversionClient>) -> ConversionOrchestrator {
        ConversionOrchestrator::new(client, &ConverterConfig::default())
    }

    #[tokio::test]
    async fn test_missing_source_never_reaches_client() {
        let mut mock = MockConversionClient::new();
        mock.expect_submit().times(0);
        let orch = orchestrator(Arc::new(mock));

        let dir = tempfile::tempdir().unwrap();
        let outcome = orch
            .convert(&dir.path().join("absent.ncm"), &dir.path().join("absent.mp3"))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_oversized_source_never_reaches_client() {
        let mut mock = MockConversionClient::new();
        mock.expect_submit().times(0);
        let config = ConverterConfig::default().with_max_source_bytes(8);
        let orch = ConversionOrchestrator::new(Arc::new(mock), &config);

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("big.ncm");
        std::fs::write(&source, b"123456789").unwrap();

        let outcome = orch.convert(&source, &dir.path().join("big.mp3")).await;

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::TooLarge));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_default_limit_with_sparse_files() {
        let dir = tempfile::tempdir().unwrap();
        let over = dir.path().join("over.ncm");
        std::fs::File::create(&over)
            .unwrap()
            .set_len(100 * 1024 * 1024 + 1)
            .unwrap();
        let song = dir.path().join("song.ncm");
        std::fs::File::create(&song)
            .unwrap()
            .set_len(80 * 1000 * 1000)
            .unwrap();

        let stub = Arc::new(StubConversionClient::succeeding(b"mp3".to_vec()));
        let orch = orchestrator(stub.clone());

        let rejected = orch.convert(&over, &dir.path().join("over.mp3")).await;
        assert_eq!(rejected.kind, Some(ErrorKind::TooLarge));
        assert_eq!(stub.call_count(), 0);

        let accepted = orch.convert(&song, &dir.path().join("song.mp3")).await;
        assert!(accepted.success);
        assert_eq!(stub.call_count(), 1);
        assert_eq!(stub.calls()[0].0, song);
    }

    #[tokio::test]
    async fn test_limit_is_inclusive() {
        let stub = Arc::new(StubConversionClient::succeeding(b"mp3".to_vec()));
        let config = ConverterConfig::default().with_max_source_bytes(9);
        let orch = ConversionOrchestrator::new(stub.clone(), &config);

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("edge.ncm");
        std::fs::write(&source, b"123456789").unwrap();

        assert!(orch.convert(&source, &dir.path().join("edge.mp3")).await.success);
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_success_invokes_client_once_and_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("song.ncm");
        let dest = dir.path().join("song.mp3");
        std::fs::write(&source, b"encrypted").unwrap();

        let mut mock = MockConversionClient::new();
        mock.expect_submit()
            .times(1)
            .withf(|s, d| s.ends_with("song.ncm") && d.ends_with("song.mp3"))
            .returning(|_, dest| {
                std::fs::write(dest, b"decoded").unwrap();
                Ok(receipt(7))
            });

        let outcome = orchestrator(Arc::new(mock)).convert(&source, &dest).await;

        assert!(outcome.success);
        assert_eq!(outcome.receipt.map(|r| r.bytes_written), Some(7));
        assert!(!source.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"decoded");
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("song.ncm");
        let dest = dir.path().join("song.mp3");
        std::fs::write(&source, b"encrypted").unwrap();

        let stub = Arc::new(StubConversionClient::failing_with_status(500));
        let outcome = orchestrator(stub.clone()).convert(&source, &dest).await;

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::RemoteFailure));
        assert_eq!(stub.call_count(), 1);
        assert!(source.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_io_failure_kind_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("song.ncm");
        std::fs::write(&source, b"encrypted").unwrap();

        let mut mock = MockConversionClient::new();
        mock.expect_submit()
            .returning(|_, _| Err(ConversionError::io("writing", std::io::Error::other("disk full"))));

        let outcome = orchestrator(Arc::new(mock))
            .convert(&source, &dir.path().join("song.mp3"))
            .await;

        assert_eq!(outcome.kind, Some(ErrorKind::IoFailure));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_panicking_client_becomes_unexpected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("song.ncm");
        std::fs::write(&source, b"encrypted").unwrap();

        struct PanickingClient;

        #[async_trait::async_trait]
        impl ConversionClient for PanickingClient {
            async fn submit(
                &self,
                _source: &Path,
                _dest: &Path,
            ) -> Result<ConversionReceipt, ConversionError> {
                panic!("decoder exploded")
            }
        }

        let outcome = orchestrator(Arc::new(PanickingClient))
            .convert(&source, &dir.path().join("song.mp3"))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::Unexpected));
        assert!(outcome.message.contains("decoder exploded"));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_slow_client() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("song.ncm");
        let dest = dir.path().join("song.mp3");
        std::fs::write(&source, b"encrypted").unwrap();

        let stub = Arc::new(
            StubConversionClient::succeeding(b"late".to_vec()).with_delay(Duration::from_secs(30)),
        );
        let orch = orchestrator(stub);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("client disconnected");
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            orch.convert_with_cancel(&source, &dest, &token),
        )
        .await
        .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.kind, Some(ErrorKind::RemoteFailure));
        assert!(source.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "conversion panicked");
    }
}

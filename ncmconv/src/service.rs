//! Upload-facing entry point.
//!
//! [`ConversionService`] stages an incoming stream, runs the orchestrator on
//! it and renders a [`ConversionReport`] that a web handler or CLI can show
//! as-is.

use futures::FutureExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::client::ConversionClient;
use crate::config::ConverterConfig;
use crate::errors::{ConfigError, ConversionError, ErrorKind};
use crate::orchestrator::ConversionOrchestrator;
use crate::outcome::{ConversionReport, ConversionRequest};
use crate::staging::StagingArea;

/// Characters left as-is in a download path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Stages uploads and converts them.
#[derive(Debug)]
pub struct ConversionService {
    staging: StagingArea,
    orchestrator: ConversionOrchestrator,
    download_prefix: String,
    stale_after: Duration,
}

impl ConversionService {
    /// Creates a service around an existing client.
    #[must_use]
    pub fn new(client: Arc<dyn ConversionClient>, config: &ConverterConfig) -> Self {
        Self {
            staging: StagingArea::new(config),
            orchestrator: ConversionOrchestrator::new(client, config),
            download_prefix: config.download_prefix.trim_end_matches('/').to_string(),
            stale_after: config.stale_after(),
        }
    }

    /// Creates a service backed by the HTTP client.
    pub fn from_config(config: &ConverterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            staging: StagingArea::new(config),
            orchestrator: ConversionOrchestrator::from_config(config)?,
            download_prefix: config.download_prefix.trim_end_matches('/').to_string(),
            stale_after: config.stale_after(),
        })
    }

    /// Gets the staging area.
    #[must_use]
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Gets the orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &ConversionOrchestrator {
        &self.orchestrator
    }

    /// Builds the download reference for a converted file name.
    ///
    /// The name is percent-encoded as a single path segment; the prefix is used verbatim.
    #[must_use]
    pub fn download_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.download_prefix,
            utf8_percent_encode(file_name, PATH_SEGMENT)
        )
    }

    /// Stages `reader` as `file_name` and converts it.
    pub async fn handle_upload<R>(
        &self,
        reader: &mut R,
        file_name: &str,
        declared_len: u64,
    ) -> ConversionReport
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        guarded(self.process(reader, file_name, declared_len, None)).await
    }

    /// Like [`handle_upload`](Self::handle_upload), abandoning the remote call when `cancel` fires.
    pub async fn handle_upload_with_cancel<R>(
        &self,
        reader: &mut R,
        file_name: &str,
        declared_len: u64,
        cancel: &CancellationToken,
    ) -> ConversionReport
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        guarded(self.process(reader, file_name, declared_len, Some(cancel)))
            .await
    }

    /// Stages a copy of a local file and converts it. The local file is left alone.
    pub async fn convert_file(&self, path: impl AsRef<Path>) -> ConversionReport {
        guarded(self.process_file(path.as_ref(), None)).await
    }

    /// Like [`convert_file`](Self::convert_file) with cancellation.
    pub async fn convert_file_with_cancel(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> ConversionReport {
        guarded(self.process_file(path.as_ref(), Some(cancel))).await
    }

    /// Removes staged files older than the configured age.
    pub async fn sweep(&self) -> Result<usize, ConversionError> {
        self.staging.sweep_stale(self.stale_after).await
    }

    async fn process_file(
        &self,
        path: &Path,
        cancel: Option<&CancellationToken>,
    ) -> ConversionReport {
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ConversionError::NotFound {
                    path: path.to_path_buf(),
                }
                .into();
            }
            Err(e) => return ConversionError::io(format!("opening {}", path.display()), e).into(),
        };
        let len = match file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                return ConversionError::io(format!("reading metadata of {}", path.display()), e)
                    .into();
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.process(&mut file, &file_name, len, cancel).await
    }

    async fn process<R>(
        &self,
        reader: &mut R,
        file_name: &str,
        declared_len: u64,
        cancel: Option<&CancellationToken>,
    ) -> ConversionReport
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let staged = match self.staging.stage(reader, file_name, declared_len).await {
            Ok(staged) => staged,
            Err(e) => {
                warn!(file_name, kind = %e.kind(), error = %e, "Upload rejected");
                return e.into();
            }
        };

        let request = ConversionRequest::new(staged.source_path.clone(), staged.dest_path.clone());
        let outcome = self.orchestrator.run(&request, cancel).await;
        if !outcome.success {
            return ConversionReport::failed(
                outcome.kind.unwrap_or(ErrorKind::Unexpected),
                outcome.message,
            );
        }

        let url = self.download_url(&staged.dest_file_name);
        info!(token = %staged.token, download_url = %url, "Converted file ready");
        ConversionReport::ready(staged.dest_file_name, url)
    }
}

async fn guarded<F>(work: F) -> ConversionReport
where
    F: std::future::Future<Output = ConversionReport>,
{
    AssertUnwindSafe(work).catch_unwind().await.unwrap_or_else(|_| {
        warn!("Upload handling panicked");
        ConversionError::Unexpected("upload handling panicked".to_string()).into()
    })
}

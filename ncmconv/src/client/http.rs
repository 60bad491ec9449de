//! reqwest-backed conversion client.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ConversionClient;
use crate::config::ConverterConfig;
use crate::errors::{ConfigError, ConversionError};
use crate::observability::SpanTimer;
use crate::outcome::ConversionReceipt;
use crate::staging::PARTIAL_EXTENSION;

/// Conversion client that posts a multipart form to the configured endpoint.
///
/// Holds one `reqwest::Client`; cloning the converter shares the connection pool.
#[derive(Debug, Clone)]
pub struct HttpConversionClient {
    http: reqwest::Client,
    endpoint_url: String,
    file_field: String,
    input_type_field: String,
    input_type: String,
    output_format_field: String,
    output_format: String,
}

impl HttpConversionClient {
    /// Builds the client and its HTTP transport from config.
    pub fn new(config: &ConverterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ConfigError::Client)?;

        Ok(Self {
            http,
            endpoint_url: config.endpoint_url.clone(),
            file_field: config.file_field.clone(),
            input_type_field: config.input_type_field.clone(),
            input_type: config.input_type.clone(),
            output_format_field: config.output_format_field.clone(),
            output_format: config.output_format.clone(),
        })
    }

    /// Gets the endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    async fn build_form(&self, source: &Path) -> Result<Form, ConversionError> {
        let file = tokio::fs::File::open(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConversionError::NotFound {
                    path: source.to_path_buf(),
                }
            } else {
                ConversionError::io(format!("opening {}", source.display()), e)
            }
        })?;
        let len = file
            .metadata()
            .await
            .map_err(|e| ConversionError::io(format!("reading metadata of {}", source.display()), e))?
            .len();
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = Part::stream_with_length(reqwest::Body::from(file), len).file_name(file_name);

        Ok(Form::new()
            .part(self.file_field.clone(), part)
            .text(self.input_type_field.clone(), self.input_type.clone())
            .text(self.output_format_field.clone(), self.output_format.clone()))
    }

    /// Streams the response body into `dest` via a sibling temporary file.
    async fn write_body(
        response: reqwest::Response,
        dest: &Path,
    ) -> Result<u64, ConversionError> {
        let partial = partial_path(dest);
        let result = Self::stream_to(response, &partial).await;
        match result {
            Ok(written) => {
                tokio::fs::rename(&partial, dest).await.map_err(|e| {
                    ConversionError::io(format!("moving output into {}", dest.display()), e)
                })?;
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial output");
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to(response: reqwest::Response, path: &Path) -> Result<u64, ConversionError> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ConversionError::io(format!("creating {}", path.display()), e))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ConversionError::Transport)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ConversionError::io(format!("writing {}", path.display()), e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| ConversionError::io(format!("flushing {}", path.display()), e))?;
        file.sync_all()
            .await
            .map_err(|e| ConversionError::io(format!("syncing {}", path.display()), e))?;
        Ok(written)
    }
}

#[async_trait]
impl ConversionClient for HttpConversionClient {
    async fn submit(&self, source: &Path, dest: &Path) -> Result<ConversionReceipt, ConversionError> {
        let timer = SpanTimer::start("conversion.submit");
        let form = self.build_form(source).await?;

        info!(endpoint = %self.endpoint_url, source = %source.display(), "Submitting file for conversion");
        let response = self
            .http
            .post(&self.endpoint_url)
            .multipart(form)
            .send()
            .await
            .map_err(ConversionError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), endpoint = %self.endpoint_url, "Remote conversion rejected");
            return Err(ConversionError::RemoteStatus {
                status: status.as_u16(),
            });
        }

        let bytes_written = Self::write_body(response, dest).await?;
        let duration_ms = timer.finish();
        debug!(dest = %dest.display(), bytes_written, duration_ms, "Converted output written");

        Ok(ConversionReceipt {
            status: status.as_u16(),
            bytes_written,
            duration_ms,
            completed_at: Utc::now(),
        })
    }
}

/// `<dir>/.<dest name>.<uuid>.part`, unique per call so concurrent writers to
/// the same destination never share a temporary file.
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(
        ".{name}.{}.{PARTIAL_EXTENSION}",
        Uuid::new_v4().simple()
    ))
}

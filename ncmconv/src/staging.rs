//! Staging area for uploaded containers.
//!
//! Uploads land in a single shared directory under a freshly generated token,
//! so concurrent uploads never write the same source path. The staging area
//! also derives the destination name for the converted file and sweeps
//! sources left behind by failed conversions.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConverterConfig, DestinationNaming};
use crate::errors::ConversionError;

/// Extension of in-progress outputs written by the HTTP client.
pub const PARTIAL_EXTENSION: &str = "part";

/// A source written to the staging directory, paired with its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    /// Unique token the source is stored under.
    pub token: Uuid,
    /// Path of the staged source.
    pub source_path: PathBuf,
    /// Path the converted artifact will be written to.
    pub dest_path: PathBuf,
    /// File name of the converted artifact, for building download links.
    pub dest_file_name: String,
    /// Bytes written while staging.
    pub bytes: u64,
}

/// Owns the staging directory layout.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    source_extension: String,
    target_extension: String,
    max_upload_bytes: u64,
    naming: DestinationNaming,
}

impl StagingArea {
    /// Creates a staging area from config. The directory is created lazily.
    #[must_use]
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            dir: config.staging_dir.clone(),
            source_extension: config.source_extension.clone(),
            target_extension: config.target_extension.clone(),
            max_upload_bytes: config.max_upload_bytes,
            naming: config.destination_naming,
        }
    }

    /// Gets the staging directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rejects uploads that cannot be a valid container before anything is written.
    pub fn validate_upload(&self, file_name: &str, declared_len: u64) -> Result<(), ConversionError> {
        if file_name.trim().is_empty() {
            return Err(ConversionError::invalid_input("no file was provided"));
        }
        if !has_extension(file_name, &self.source_extension) {
            return Err(ConversionError::invalid_input(format!(
                "'{file_name}' is not a .{} file",
                self.source_extension
            )));
        }
        if declared_len == 0 {
            return Err(ConversionError::invalid_input("the file is empty"));
        }
        if declared_len > self.max_upload_bytes {
            return Err(ConversionError::invalid_input(format!(
                "the upload exceeds {} bytes",
                self.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Validates and writes an upload into the staging directory.
    ///
    /// On any failure no file is left behind.
    pub async fn stage<R>(
        &self,
        reader: &mut R,
        file_name: &str,
        declared_len: u64,
    ) -> Result<StagedUpload, ConversionError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.validate_upload(file_name, declared_len)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ConversionError::io(format!("creating {}", self.dir.display()), e))?;

        let token = Uuid::new_v4();
        let source_path = self.dir.join(format!("{token}.{}", self.source_extension));

        let bytes = match self.write_source(reader, &source_path).await {
            Ok(0) => {
                remove_quietly(&source_path).await;
                return Err(ConversionError::invalid_input("the file is empty"));
            }
            Ok(bytes) => bytes,
            Err(e) => {
                remove_quietly(&source_path).await;
                return Err(e);
            }
        };

        let dest_file_name = self.destination_name(file_name, token);
        let dest_path = self.dir.join(&dest_file_name);
        info!(%token, source = %source_path.display(), bytes, "Upload staged");

        Ok(StagedUpload {
            token,
            source_path,
            dest_path,
            dest_file_name,
            bytes,
        })
    }

    /// Derives the converted file name for an upload.
    #[must_use]
    pub fn destination_name(&self, original_name: &str, token: Uuid) -> String {
        match self.naming {
            DestinationNaming::OriginalStem => {
                format!("{}.{}", base_name(original_name), self.target_extension)
            }
            DestinationNaming::StagingToken => format!("{token}.{}", self.target_extension),
        }
    }

    /// Removes staged sources and abandoned partial outputs whose last
    /// modification is older than `max_age`.
    ///
    /// Finished converted outputs belong to the download layer and are never
    /// touched. Returns the number of files removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize, ConversionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(ConversionError::io(format!("listing {}", self.dir.display()), e));
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConversionError::io(format!("listing {}", self.dir.display()), e))?
        {
            let path = entry.path();
            let sweepable = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                has_extension(n, &self.source_extension) || has_extension(n, PARTIAL_EXTENSION)
            });
            if !sweepable {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if !metadata.is_file() || age < max_age {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "Swept stale staged file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to sweep staged file"),
            }
        }

        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Stale staged files swept");
        }
        Ok(removed)
    }

    async fn write_source<R>(&self, reader: &mut R, path: &Path) -> Result<u64, ConversionError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ConversionError::io(format!("creating {}", path.display()), e))?;
        let bytes = tokio::io::copy(reader, &mut file)
            .await
            .map_err(|e| ConversionError::io(format!("writing {}", path.display()), e))?;
        file.flush()
            .await
            .map_err(|e| ConversionError::io(format!("flushing {}", path.display()), e))?;
        Ok(bytes)
    }
}

/// Case-insensitive check of the final extension, without the dot.
#[must_use]
pub fn has_extension(file_name: &str, extension: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// The declared name stripped of any directory part and of its extension.
///
/// Both separators are honoured because browsers on some platforms send the
/// full client path as the file name.
#[must_use]
pub fn base_name(file_name: &str) -> String {
    let last = file_name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(file_name);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if stem.is_empty() || stem == "." || stem == ".." {
        "converted".to_string()
    } else {
        stem.to_string()
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial staged file");
        }
    }
}

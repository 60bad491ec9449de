//! Values describing one conversion attempt and its result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::{ConversionError, ErrorKind};

/// One attempt at converting a staged source into a destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Identifier carried through every log line of this attempt.
    pub request_id: Uuid,
    /// The staged source artifact.
    pub source: PathBuf,
    /// Where the converted artifact is written.
    pub dest: PathBuf,
}

impl ConversionRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            source: source.into(),
            dest: dest.into(),
        }
    }
}

/// What the client reports after writing the converted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReceipt {
    /// HTTP status returned by the remote service.
    pub status: u16,
    /// Bytes written to the destination.
    pub bytes_written: u64,
    /// Time spent in the round trip, in milliseconds.
    pub duration_ms: f64,
    /// When the destination write finished.
    pub completed_at: DateTime<Utc>,
}

/// Result of [`crate::orchestrator::ConversionOrchestrator::convert`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    /// Whether the converted artifact is available.
    pub success: bool,
    /// Human readable description of what happened.
    pub message: String,
    /// Failure classification, `None` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    /// Details of the successful round trip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ConversionReceipt>,
}

impl ConversionOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(receipt: ConversionReceipt, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            kind: None,
            receipt: Some(receipt),
        }
    }

    /// Creates a failed outcome from an error.
    #[must_use]
    pub fn failed(error: &ConversionError) -> Self {
        Self {
            success: false,
            message: error.user_message(),
            kind: Some(error.kind()),
            receipt: None,
        }
    }
}

/// The result surface handed to whatever renders the upload page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    /// Whether the converted file can be downloaded.
    pub success: bool,
    /// Message suitable for direct display.
    pub message: String,
    /// Download reference for the converted file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// File name of the converted file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Failure classification, `None` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ConversionReport {
    /// Creates a successful report.
    #[must_use]
    pub fn ready(file_name: impl Into<String>, download_url: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self {
            success: true,
            message: format!("Conversion succeeded: {file_name}"),
            download_url: Some(download_url.into()),
            file_name: Some(file_name),
            kind: None,
        }
    }

    /// Creates a failed report.
    #[must_use]
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            download_url: None,
            file_name: None,
            kind: Some(kind),
        }
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("success".to_string(), serde_json::json!(self.success));
        dict.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref url) = self.download_url {
            dict.insert("download_url".to_string(), serde_json::json!(url));
        }
        if let Some(ref name) = self.file_name {
            dict.insert("file_name".to_string(), serde_json::json!(name));
        }
        if let Some(kind) = self.kind {
            dict.insert("kind".to_string(), serde_json::json!(kind.as_str()));
        }
        dict
    }
}

impl From<ConversionError> for ConversionReport {
    fn from(err: ConversionError) -> Self {
        Self::failed(err.kind(), err.user_message())
    }
}

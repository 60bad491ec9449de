//! Error types for the conversion workflow.
//!
//! Every failure is classified into an [`ErrorKind`]. The kind survives all
//! the way to the caller-facing report so hosting layers can branch on it
//! while still showing [`ConversionError::user_message`] to the user.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, empty or wrongly named upload. Always user-correctable.
    InvalidInput,
    /// The staged source disappeared before conversion.
    NotFound,
    /// The source exceeds the accepted size ceiling.
    TooLarge,
    /// The remote service rejected the request or could not be reached.
    RemoteFailure,
    /// Local filesystem error while staging, reading or writing.
    IoFailure,
    /// Anything else, including panics caught at the orchestrator boundary.
    Unexpected,
}

impl ErrorKind {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RemoteFailure)
    }

    /// Stable snake_case name, used in logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::TooLarge => "too_large",
            Self::RemoteFailure => "remote_failure",
            Self::IoFailure => "io_failure",
            Self::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for conversion operations.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The upload failed validation before anything was written.
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Why the upload was rejected.
        reason: String,
    },

    /// The staged source file does not exist.
    #[error("Source file not found: {}", path.display())]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The source is larger than the configured ceiling.
    #[error("Source file is {size} bytes, limit is {limit} bytes")]
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// The remote service answered with a non-success status.
    #[error("Remote conversion failed with status {status}")]
    RemoteStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// The request never produced a usable response.
    #[error("Remote transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The attempt was cancelled by the caller.
    #[error("Conversion cancelled: {0}")]
    Cancelled(String),

    /// A local filesystem operation failed.
    #[error("IO error while {context}: {source}")]
    Io {
        /// What was being done when the error occurred.
        context: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Unexpected(String),
}

impl ConversionError {
    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Creates an IO error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::RemoteStatus { .. } | Self::Transport(_) | Self::Cancelled(_) => {
                ErrorKind::RemoteFailure
            }
            Self::Io { .. } => ErrorKind::IoFailure,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// A message suitable for showing directly to the person who uploaded the file.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInput { reason } => {
                format!("Please upload a valid NCM audio file: {reason}")
            }
            Self::NotFound { .. } => {
                "The uploaded file is no longer available, please upload it again.".to_string()
            }
            Self::TooLarge { limit, .. } => {
                format!("The file is too large, the limit is {} MB.", limit / (1024 * 1024))
            }
            Self::RemoteStatus { .. } | Self::Transport(_) | Self::Cancelled(_) => {
                "Conversion failed: the file may be unsupported or the conversion service is \
                 temporarily unavailable. Please try again later."
                    .to_string()
            }
            Self::Io { .. } => "Conversion failed because of a server storage error.".to_string(),
            Self::Unexpected(msg) => format!("System error: {msg}"),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().as_str()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        if let Self::RemoteStatus { status } = self {
            map.insert("status".to_string(), serde_json::json!(status));
        }
        map
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// The config path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`crate::config::ConverterConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the converter cannot work with.
    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The HTTP transport could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ConfigError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

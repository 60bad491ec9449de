//! Configuration for the converter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "NCMCONV_";

/// How the converted artifact is named inside the staging directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationNaming {
    /// `<original base name>.<target extension>`. Uploads sharing a base name
    /// overwrite each other's output.
    #[default]
    OriginalStem,
    /// `<staging token>.<target extension>`, unique per upload.
    StagingToken,
}

impl std::str::FromStr for DestinationNaming {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original_stem" => Ok(Self::OriginalStem),
            "staging_token" => Ok(Self::StagingToken),
            other => Err(ConfigError::invalid(
                "destination_naming",
                format!("unknown naming '{other}', expected 'original_stem' or 'staging_token'"),
            )),
        }
    }
}

/// Configuration for staging, validation and the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Remote conversion endpoint.
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
    /// Request timeout in seconds, covering upload, remote processing and download.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Multipart field carrying the file bytes.
    #[serde(default = "default_file_field")]
    pub file_field: String,
    /// Multipart field naming the input format.
    #[serde(default = "default_input_type_field")]
    pub input_type_field: String,
    /// Value sent in `input_type_field`.
    #[serde(default = "default_input_type")]
    pub input_type: String,
    /// Multipart field naming the desired output format.
    #[serde(default = "default_output_format_field")]
    pub output_format_field: String,
    /// Value sent in `output_format_field`.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Extension accepted for uploads, without the dot.
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
    /// Extension given to converted files, without the dot.
    #[serde(default = "default_target_extension")]
    pub target_extension: String,
    /// Largest source accepted for conversion, in bytes.
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: u64,
    /// Transport-level body ceiling for the hosting layer, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Directory holding staged sources and converted outputs.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// URL prefix under which the staging directory is served.
    #[serde(default = "default_download_prefix")]
    pub download_prefix: String,
    /// Naming policy for converted files.
    #[serde(default)]
    pub destination_naming: DestinationNaming,
    /// Age after which a leftover staged source is swept.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
}

fn default_endpoint_url() -> String {
    "https://tool.liumingye.cn/music/api/convert".to_string()
}

fn default_timeout() -> f64 {
    300.0
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_file_field() -> String {
    "file".to_string()
}

fn default_input_type_field() -> String {
    "type".to_string()
}

fn default_input_type() -> String {
    "ncm".to_string()
}

fn default_output_format_field() -> String {
    "format".to_string()
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_source_extension() -> String {
    "ncm".to_string()
}

fn default_target_extension() -> String {
    "mp3".to_string()
}

fn default_max_source_bytes() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_max_upload_bytes() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_download_prefix() -> String {
    "/uploads".to_string()
}

fn default_stale_after() -> u64 {
    24 * 60 * 60
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            file_field: default_file_field(),
            input_type_field: default_input_type_field(),
            input_type: default_input_type(),
            output_format_field: default_output_format_field(),
            output_format: default_output_format(),
            source_extension: default_source_extension(),
            target_extension: default_target_extension(),
            max_source_bytes: default_max_source_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            staging_dir: default_staging_dir(),
            download_prefix: default_download_prefix(),
            destination_naming: DestinationNaming::default(),
            stale_after_seconds: default_stale_after(),
        }
    }
}

impl ConverterConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses a configuration from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `NCMCONV_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(std::env::vars())
    }

    /// Applies `NCMCONV_*` overrides from the given key/value pairs.
    pub fn apply_vars<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "ENDPOINT_URL" => self.endpoint_url = value,
                "TIMEOUT_SECONDS" => {
                    self.timeout_seconds = value.parse().map_err(|_| {
                        ConfigError::invalid("timeout_seconds", format!("'{value}' is not a number"))
                    })?;
                }
                "USER_AGENT" => self.user_agent = value,
                "MAX_SOURCE_BYTES" => {
                    self.max_source_bytes = value.parse().map_err(|_| {
                        ConfigError::invalid("max_source_bytes", format!("'{value}' is not a byte count"))
                    })?;
                }
                "STAGING_DIR" => self.staging_dir = PathBuf::from(value),
                "DOWNLOAD_PREFIX" => self.download_prefix = value,
                "DESTINATION_NAMING" => self.destination_naming = value.parse()?,
                _ => tracing::debug!(variable = %key, "Ignoring unknown config override"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint_url.starts_with("http://") || self.endpoint_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "endpoint_url",
                format!("'{}' is not an http(s) URL", self.endpoint_url),
            ));
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ConfigError::invalid("timeout_seconds", "must be a positive number"));
        }
        if Duration::try_from_secs_f64(self.timeout_seconds).is_err() {
            return Err(ConfigError::invalid(
                "timeout_seconds",
                format!("{} seconds is out of range", self.timeout_seconds),
            ));
        }
        if self.max_source_bytes == 0 {
            return Err(ConfigError::invalid("max_source_bytes", "must be greater than zero"));
        }
        if self.max_upload_bytes < self.max_source_bytes {
            return Err(ConfigError::invalid(
                "max_upload_bytes",
                "must not be smaller than max_source_bytes",
            ));
        }
        for (field, ext) in [
            ("source_extension", &self.source_extension),
            ("target_extension", &self.target_extension),
        ] {
            if ext.is_empty() || ext.contains(&['.', '/', '\\'][..]) {
                return Err(ConfigError::invalid(field, format!("'{ext}' is not a bare extension")));
            }
        }
        Ok(())
    }

    /// Sets the endpoint URL.
    #[must_use]
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = url.into();
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the staging directory.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Sets the maximum source size.
    #[must_use]
    pub fn with_max_source_bytes(mut self, bytes: u64) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    /// Sets the destination naming policy.
    #[must_use]
    pub fn with_destination_naming(mut self, naming: DestinationNaming) -> Self {
        self.destination_naming = naming;
        self
    }

    /// Gets timeout as Duration. Out-of-range values saturate at `Duration::MAX`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds).unwrap_or(Duration::MAX)
    }

    /// Gets the stale-file age as Duration.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

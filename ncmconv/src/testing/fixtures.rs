//! Test fixtures for conversion tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::ConverterConfig;

/// A temporary directory with a config whose staging area lives inside it.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
    config: ConverterConfig,
}

impl TestWorkspace {
    /// Creates a workspace with default config and `<tmp>/uploads` staging.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temporary directory");
        let config = ConverterConfig::new().with_staging_dir(dir.path().join("uploads"));
        Self { dir, config }
    }

    /// Replaces the config, keeping the staging directory inside the workspace.
    #[must_use]
    pub fn with_config(mut self, config: ConverterConfig) -> Self {
        let staging = self.staging_dir();
        self.config = config.with_staging_dir(staging);
        self
    }

    /// Gets the workspace root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Gets the staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.config.staging_dir.clone()
    }

    /// Gets the config.
    #[must_use]
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Lists the file names currently in the staging directory, sorted.
    #[must_use]
    pub fn staged_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.staging_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `bytes` to `dir/name` and returns the path.
///
/// # Panics
///
/// Panics if the file cannot be written.
#[allow(clippy::expect_used)]
pub fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("failed to write source fixture");
    path
}

/// Creates `dir/name` as a sparse file of `len` bytes.
///
/// # Panics
///
/// Panics if the file cannot be created.
#[allow(clippy::expect_used)]
pub fn sparse_source(dir: &Path, name: &str, len: u64) -> PathBuf {
    let path = dir.join(name);
    std::fs::File::create(&path)
        .and_then(|f| f.set_len(len))
        .expect("failed to create sparse fixture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_stages_inside_tempdir() {
        let ws = TestWorkspace::new();
        assert!(ws.staging_dir().starts_with(ws.path()));
        assert!(ws.staged_files().is_empty());

        let ws = ws.with_config(ConverterConfig::new().with_max_source_bytes(10));
        assert_eq!(ws.config().max_source_bytes, 10);
        assert!(ws.staging_dir().starts_with(ws.path()));
    }

    #[test]
    fn test_sparse_source_has_requested_length() {
        let ws = TestWorkspace::new();
        let path = sparse_source(ws.path(), "big.ncm", 1024 * 1024);
        assert_eq!(std::fs::metadata(path).unwrap().len(), 1024 * 1024);
    }
}

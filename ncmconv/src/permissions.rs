//! Best-effort permission normalization for staged files.
//!
//! Uploads written by other processes may carry restrictive permissions. Before
//! reading a source we try to give the current user read and write access. The
//! attempt never fails the conversion: the result is reported as a
//! [`PermissionOutcome`] and logged by the caller.

use std::path::Path;

/// Result of a normalization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// Permissions were already sufficient or were updated.
    Applied,
    /// The attempt was skipped or failed; the reason is informational only.
    Ignored(String),
}

impl PermissionOutcome {
    /// Returns true if the permissions were applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Grants the current user read and write access to `path`, if possible.
pub fn normalize_permissions(path: &Path) -> PermissionOutcome {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => return PermissionOutcome::Ignored(format!("cannot stat file: {e}")),
    };
    if !metadata.is_file() {
        return PermissionOutcome::Ignored("not a regular file".to_string());
    }

    let mut permissions = metadata.permissions();
    if !grant_owner_access(&mut permissions) {
        return PermissionOutcome::Applied;
    }

    match std::fs::set_permissions(path, permissions) {
        Ok(()) => PermissionOutcome::Applied,
        Err(e) => PermissionOutcome::Ignored(format!("cannot update permissions: {e}")),
    }
}

/// Returns true if `permissions` changed.
#[cfg(unix)]
fn grant_owner_access(permissions: &mut std::fs::Permissions) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let mode = permissions.mode();
    let wanted = mode | 0o600;
    if wanted == mode {
        return false;
    }
    permissions.set_mode(wanted);
    true
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn grant_owner_access(permissions: &mut std::fs::Permissions) -> bool {
    if !permissions.readonly() {
        return false;
    }
    permissions.set_readonly(false);
    true
}

//! Atomic file-system helpers.
//!
//! Every persisted document in this system (the server config is only ever
//! *read* by us, but session records, presets, and OAuth token material are
//! *written* by us) goes through [`FileSystem::write_atomic`] — write to a
//! sibling temp file, then rename over the destination, so a crash or a
//! concurrent reader never observes a half-written file.

use crate::error::{CommonError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Restrictive permission presets for files written to the config directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePermissions {
    /// Owner read/write only (0o600) — used for OAuth token material.
    OwnerReadWrite,
    /// Standard permissions (0o644) — used for non-sensitive documents.
    Standard,
}

impl FilePermissions {
    #[cfg(unix)]
    fn as_mode(self) -> u32 {
        match self {
            Self::OwnerReadWrite => 0o600,
            Self::Standard => 0o644,
        }
    }
}

/// Abstraction over the handful of file operations this system needs.
///
/// Exists so tests can substitute a fake rather than touching real disk, and
/// so every write path goes through the same atomic-rename discipline.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write_atomic(&self, path: &Path, content: &str, perms: FilePermissions) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn modified(&self, path: &Path) -> Result<std::time::SystemTime>;
}

/// The real, disk-backed [`FileSystem`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| CommonError::io(path, e))
    }

    fn write_atomic(&self, path: &Path, content: &str, perms: FilePermissions) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.create_dir_all(dir)?;

        let tmp_path = tmp_path_for(path);
        fs::write(&tmp_path, content).map_err(|e| CommonError::io(&tmp_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = perms.as_mode();
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))
                .map_err(|e| CommonError::io(&tmp_path, e))?;
        }
        #[cfg(not(unix))]
        {
            let _ = perms;
        }

        fs::rename(&tmp_path, path).map_err(|e| CommonError::io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| CommonError::directory_creation(path, e))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CommonError::io(path, e)),
        }
    }

    fn modified(&self, path: &Path) -> Result<std::time::SystemTime> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| CommonError::io(path, e))
    }
}

/// Temp-file path used by the write-temp-then-rename pattern: same directory
/// as the destination (so the rename is same-filesystem) with a `.tmp-<pid>`
/// suffix to avoid collisions between concurrent writers.
fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("aggmcp");
    path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()))
}

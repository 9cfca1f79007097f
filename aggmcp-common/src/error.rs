//! Error types shared by the rest of the `aggmcp` crates.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for `aggmcp-common` operations.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Foundational error type for file-system and directory operations.
#[derive(Error, Debug)]
pub enum CommonError {
    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path was expected to be absolute, writable, or otherwise well-formed
    /// and wasn't.
    #[error("invalid path: {path}")]
    InvalidPath { path: PathBuf },

    /// Generic I/O error with file-path context.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The user's home directory could not be resolved.
    #[error("could not resolve the home directory")]
    NoHomeDirectory,

    /// Other error with a custom message.
    #[error("{message}")]
    Other { message: String },
}

impl CommonError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn directory_creation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreation {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_path(path: impl Into<PathBuf>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

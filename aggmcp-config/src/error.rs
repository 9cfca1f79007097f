//! Error types for the config pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for `aggmcp-config` operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors produced by the config-loading pipeline.
///
/// Variants are named by loader stage so that callers (the reload engine,
/// in particular) can match on them directly rather than inspecting message
/// strings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Step 1 of the loader pipeline: reading the config file off disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Step 2: the document is not valid JSON5.
    #[error("failed to parse {path} as JSON5: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Step 4: the parsed document does not satisfy the config shape.
    #[error("validation failed at {path}: {reason}")]
    Validation { path: String, reason: String },

    /// Step 5: a template server's fields could not be rendered against the
    /// current context.
    #[error("failed to render template server '{server_name}': {reason}")]
    Render { server_name: String, reason: String },

    /// Strict-mode environment substitution hit a variable with no value
    /// and no default.
    #[error("environment variable '{0}' is not set and no default was given")]
    MissingEnvVar(String),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn render(server_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Render {
            server_name: server_name.into(),
            reason: reason.into(),
        }
    }
}

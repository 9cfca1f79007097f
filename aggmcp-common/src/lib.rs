//! Foundational utilities shared by every `aggmcp-*` crate.
//!
//! This crate has no knowledge of MCP or of the proxy domain: a structured
//! error type, an atomic file-system abstraction, config-directory
//! resolution, a tracing bootstrap, and the sensitive-environment-variable
//! matcher shared by the transport factory and the context propagator.

pub mod directory;
pub mod env_filter;
pub mod error;
pub mod fs_utils;
pub mod logging;

pub use error::{CommonError, Result};
pub use fs_utils::{FilePermissions, FileSystem, RealFileSystem};

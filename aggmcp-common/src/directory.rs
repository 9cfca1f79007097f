//! Resolution of the on-disk config directory: the platform config
//! directory (`~/.config/aggmcp` on Linux, the platform equivalent
//! elsewhere via the `dirs` crate).

use crate::error::{CommonError, Result};
use std::path::PathBuf;

/// The directory name used under the platform config root.
pub const APP_DIR_NAME: &str = "aggmcp";

/// Resolve `~/.config/aggmcp` (or the platform equivalent), creating it if
/// it does not already exist.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or(CommonError::NoHomeDirectory)?;
    let dir = base.join(APP_DIR_NAME);
    std::fs::create_dir_all(&dir).map_err(|e| CommonError::directory_creation(&dir, e))?;
    Ok(dir)
}

/// Path to the watched server-configuration file, `<config_dir>/mcp.json`.
pub fn mcp_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("mcp.json"))
}

/// Path to the preset store, `<config_dir>/presets.json`.
pub fn presets_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("presets.json"))
}

/// Path to the inbound-session record for `session_id`, named with a short
/// fixed prefix so the directory can be swept without parsing every file.
pub fn session_path(session_id: &str) -> Result<PathBuf> {
    Ok(config_dir()?
        .join("sessions")
        .join(format!("sess-{session_id}.json")))
}

/// Path to the OAuth token-material file for a given outbound server name.
pub fn client_session_path(server_name: &str) -> Result<PathBuf> {
    Ok(config_dir()?
        .join("clientSessions")
        .join(format!("{server_name}.json")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_path_is_namespaced_under_sessions() {
        // config_dir() touches the real home directory; only assert on the
        // suffix shape, not the resolved root.
        let path = session_path("abc123").unwrap();
        assert!(path.ends_with("sessions/sess-abc123.json"));
    }

    #[test]
    fn client_session_path_is_namespaced_under_client_sessions() {
        let path = client_session_path("github").unwrap();
        assert!(path.ends_with("clientSessions/github.json"));
    }
}

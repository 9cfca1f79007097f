//! Context Propagator: builds the per-request [`ContextSnapshot`] used
//! both to render template servers and to inject context into outbound
//! request headers.
//!
//! Git probes shell out via `tokio::process::Command` with an explicit
//! argv, never a shell, under an allow-listed binary name and an argument
//! sanitizer — deliberately not `git2`, which manages repositories rather
//! than running named subcommands under a sanitizer.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use aggmcp_config::{
    ClientInfo, ContextSnapshot, EnvironmentContext, GitContext, ProjectContext, TransportInfo, UserContext,
};
use rand::Rng;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ProxyError;

const GIT_TIMEOUT: Duration = Duration::from_secs(5);
const OUTPUT_CAP_BYTES: usize = 1024 * 1024;
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']'];
const ALLOWED_BINARY: &str = "git";

/// Builds [`ContextSnapshot`]s for template rendering and header injection.
pub struct ContextPropagator {
    env_allowlist_prefixes: Vec<String>,
    version: String,
}

impl ContextPropagator {
    pub fn new(env_allowlist_prefixes: Vec<String>) -> Self {
        Self {
            env_allowlist_prefixes,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn build(&self, project_path: &Path, transport: TransportInfo) -> ContextSnapshot {
        let project = self.build_project_context(project_path).await;
        let user = build_user_context();
        let environment = self.build_environment_context();

        ContextSnapshot {
            project,
            user,
            environment,
            session_id: generate_session_id(),
            version: self.version.clone(),
            timestamp_millis: now_millis(),
            transport,
        }
    }

    async fn build_project_context(&self, path: &Path) -> ProjectContext {
        let sanitized_path = sanitize_path(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let git = probe_git(path).await;

        ProjectContext {
            path: sanitized_path,
            name,
            environment: std::env::var("AGGMCP_ENVIRONMENT").ok(),
            git,
            custom: BTreeMap::new(),
        }
    }

    fn build_environment_context(&self) -> EnvironmentContext {
        let mut variables = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if aggmcp_common::env_filter::is_sensitive_name(&key) {
                continue;
            }
            if aggmcp_common::env_filter::matches_any_prefix(&key, &self.env_allowlist_prefixes) {
                variables.insert(key, value);
            }
        }
        EnvironmentContext {
            variables,
            prefixes: self.env_allowlist_prefixes.clone(),
        }
    }
}

fn sanitize_path(path: &Path) -> String {
    let raw = path.to_string_lossy().to_string();
    if let Some(home) = dirs::home_dir() {
        let home_str = home.to_string_lossy();
        if let Some(stripped) = raw.strip_prefix(home_str.as_ref()) {
            return format!("~{stripped}");
        }
    }
    raw
}

fn build_user_context() -> UserContext {
    let home = dirs::home_dir().map(|p| sanitize_path(&p)).unwrap_or_default();
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let shell = std::env::var("SHELL").ok();

    #[cfg(unix)]
    let (uid, gid) = unsafe { (Some(libc::getuid()), Some(libc::getgid())) };
    #[cfg(not(unix))]
    let (uid, gid) = (None, None);

    UserContext {
        username,
        uid,
        gid,
        home,
        shell,
    }
}

fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..9).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect();
    format!("ctx_{}_{}", now_millis(), suffix)
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_millis() as i64
}

/// Reject argv entries containing shell metacharacters, `..` traversal, or
/// a leading destructive command name.
fn sanitize_arg(arg: &str) -> Result<(), ProxyError> {
    if arg.contains("..") {
        return Err(ProxyError::Validation(aggmcp_config::ConfigError::validation(
            "argument sanitizer",
            "path traversal ('..') rejected in git probe argument",
        )));
    }
    if arg.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(ProxyError::Validation(aggmcp_config::ConfigError::validation(
            "argument sanitizer",
            "shell metacharacter rejected in git probe argument",
        )));
    }
    let lowered = arg.to_ascii_lowercase();
    if lowered.starts_with("rm") || lowered.starts_with("sudo") {
        return Err(ProxyError::Validation(aggmcp_config::ConfigError::validation(
            "argument sanitizer",
            "leading 'rm'/'sudo' rejected in git probe argument",
        )));
    }
    Ok(())
}

async fn run_git(cwd: &Path, args: &[&str]) -> Option<String> {
    for arg in args {
        if sanitize_arg(arg).is_err() {
            return None;
        }
    }

    let mut command = Command::new(ALLOWED_BINARY);
    command.args(args).current_dir(cwd).kill_on_drop(true);

    let output = match timeout(GIT_TIMEOUT, command.output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        _ => return None,
    };

    let mut stdout = output.stdout;
    stdout.truncate(OUTPUT_CAP_BYTES);
    let text = String::from_utf8_lossy(&stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn probe_git(cwd: &Path) -> GitContext {
    let is_repo = run_git(cwd, &["rev-parse", "--git-dir"]).await.is_some();
    if !is_repo {
        return GitContext::default();
    }

    let branch = run_git(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]).await;
    let commit = run_git(cwd, &["rev-parse", "--short=8", "HEAD"]).await;
    let repository = run_git(cwd, &["config", "--get", "remote.origin.url"]).await;

    GitContext {
        is_repo,
        branch,
        commit,
        repository,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> TransportInfo {
        TransportInfo {
            kind: "stdio".to_string(),
            url: None,
            client: ClientInfo {
                name: "test-client".to_string(),
                version: "1.0".to_string(),
            },
        }
    }

    #[test]
    fn sanitize_arg_rejects_dotdot() {
        assert!(sanitize_arg("../secrets").is_err());
    }

    #[test]
    fn sanitize_arg_rejects_shell_metacharacters() {
        assert!(sanitize_arg("HEAD; rm -rf /").is_err());
        assert!(sanitize_arg("$(whoami)").is_err());
    }

    #[test]
    fn sanitize_arg_rejects_leading_rm_or_sudo() {
        assert!(sanitize_arg("rm-something").is_err());
        assert!(sanitize_arg("sudo-ish").is_err());
    }

    #[test]
    fn sanitize_arg_accepts_normal_git_args() {
        assert!(sanitize_arg("--abbrev-ref").is_ok());
        assert!(sanitize_arg("HEAD").is_ok());
        assert!(sanitize_arg("remote.origin.url").is_ok());
    }

    #[tokio::test]
    async fn non_git_directory_yields_is_repo_false() {
        let dir = tempfile::tempdir().unwrap();
        let git = probe_git(dir.path()).await;
        assert!(!git.is_repo);
        assert!(git.branch.is_none());
    }

    #[tokio::test]
    async fn build_produces_a_populated_session_id() {
        let propagator = ContextPropagator::new(vec!["AGGMCP_".to_string()]);
        let dir = tempfile::tempdir().unwrap();
        let snapshot = propagator.build(dir.path(), transport()).await;
        assert!(snapshot.session_id.starts_with("ctx_"));
    }

    #[test]
    fn sanitized_path_replaces_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            let nested = home.join("work/aggmcp");
            let sanitized = sanitize_path(&nested);
            assert!(sanitized.starts_with('~'));
        }
    }
}

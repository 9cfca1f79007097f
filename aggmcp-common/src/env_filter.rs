//! Sensitive-environment-variable matching shared by the transport factory's
//! stdio env assembly and the context propagator's environment snapshot.

/// Substrings (case-insensitive) that mark an environment variable name as
/// sensitive. Any variable whose name contains one of these, anywhere, is
/// never forwarded to a downstream process or captured into a context
/// snapshot — regardless of `envFilter`/prefix allowlists.
pub const SENSITIVE_NAME_SUBSTRINGS: &[&str] = &[
    "PASSWORD",
    "SECRET",
    "TOKEN",
    "KEY",
    "AUTH",
    "CREDENTIAL",
    "PRIVATE",
];

/// Returns `true` if `name` contains one of [`SENSITIVE_NAME_SUBSTRINGS`],
/// matched case-insensitively.
pub fn is_sensitive_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SENSITIVE_NAME_SUBSTRINGS
        .iter()
        .any(|needle| upper.contains(needle))
}

/// Returns `true` if `name` starts with any of `prefixes` (exact, case
/// sensitive — environment variable names are conventionally upper-cased by
/// convention, not by this code).
pub fn matches_any_prefix(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sensitive_substrings_case_insensitively() {
        for name in [
            "DB_PASSWORD",
            "api_key",
            "OAuth_Token",
            "GH_SECRET",
            "my_credential_file",
            "PRIVATE_key_path",
            "AUTHORIZATION",
        ] {
            assert!(is_sensitive_name(name), "{name} should be sensitive");
        }
    }

    #[test]
    fn allows_ordinary_names() {
        for name in ["PATH", "HOME", "LANG", "NODE_ENV", "PROJECT_NAME"] {
            assert!(!is_sensitive_name(name), "{name} should not be sensitive");
        }
    }

    #[test]
    fn prefix_matching_is_exact_prefix_not_substring() {
        let prefixes = vec!["MCP_".to_string(), "CI".to_string()];
        assert!(matches_any_prefix("MCP_SERVER_NAME", &prefixes));
        assert!(matches_any_prefix("CI_BUILD", &prefixes));
        assert!(!matches_any_prefix("SOME_MCP_THING", &prefixes));
    }
}

//! `${NAME}` / `${NAME:-default}` substitution over a parsed config document.
//!
//! Substitution walks the JSON value tree once: nested `${...}` produced by
//! a substituted value is never re-expanded — substitutions resolve exactly
//! once, with no recursion.

use crate::error::ConfigError;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::trace;

/// Matches `${VAR_NAME}` and `${VAR_NAME:-default}`.
fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is a fixed, valid regex")
    })
}

/// Environment-variable substitution processor.
///
/// `strict` controls the behavior for a variable with no default and no
/// value set in the environment: `false` substitutes the empty string
/// (the default), `true` returns [`ConfigError::MissingEnvVar`].
pub struct EnvSubstitutor {
    strict: bool,
}

impl EnvSubstitutor {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Substitute in place, recursing through arrays and objects.
    pub fn substitute_value(&self, value: &mut Value) -> Result<(), ConfigError> {
        match value {
            Value::String(s) => {
                *s = self.substitute_string(s)?;
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.substitute_value(item)?;
                }
            }
            Value::Object(map) => {
                for (_, v) in map.iter_mut() {
                    self.substitute_value(v)?;
                }
            }
            Value::Number(_) | Value::Bool(_) | Value::Null => {}
        }
        Ok(())
    }

    /// Substitute within a single string, applying each match exactly once.
    pub fn substitute_string(&self, s: &str) -> Result<String, ConfigError> {
        if self.strict {
            for caps in var_pattern().captures_iter(s) {
                let name = &caps[1];
                if std::env::var(name).is_err() && caps.get(2).is_none() {
                    return Err(ConfigError::MissingEnvVar(name.to_string()));
                }
            }
        }

        Ok(var_pattern()
            .replace_all(s, |caps: &regex::Captures| {
                let name = &caps[1];
                match std::env::var(name) {
                    Ok(value) => value,
                    Err(_) => match caps.get(2) {
                        Some(default) => default.as_str().to_string(),
                        None => {
                            trace!(var = name, "missing env var, substituting empty string");
                            String::new()
                        }
                    },
                }
            })
            .into_owned())
    }
}

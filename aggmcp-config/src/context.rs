//! The per-request context snapshot used to render template servers.
//!
//! This type is intentionally a plain, hashable data value: gathering it
//! (reading env vars, probing git, asking the OS for the current user)
//! is the Context Propagator's job, which lives in `aggmcp-proxy` — this
//! crate only needs the *shape* so the Config Loader can render template
//! servers against it and cache renders by its hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitContext {
    pub is_repo: bool,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub path: String,
    pub name: String,
    pub environment: Option<String>,
    pub git: GitContext,
    pub custom: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub username: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub home: String,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub variables: BTreeMap<String, String>,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    pub client: ClientInfo,
}

/// Immutable, hashable snapshot of the context a template render or an
/// outbound request header is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub project: ProjectContext,
    pub user: UserContext,
    pub environment: EnvironmentContext,
    pub session_id: String,
    pub version: String,
    pub timestamp_millis: i64,
    pub transport: TransportInfo,
}

impl ContextSnapshot {
    /// `sha256` over canonical (key-sorted) JSON, used as the template
    /// render cache key.
    pub fn content_hash(&self) -> String {
        // serde_json::Value from a BTreeMap-backed struct serializes with
        // sorted object keys already, since every map field here is a
        // BTreeMap and every struct field order is fixed by derive order.
        let canonical = serde_json::to_string(self).expect("ContextSnapshot always serializes");
        let digest = Sha256::digest(canonical.as_bytes());
        hex_encode(&digest)
    }

    /// Convert to a Liquid-renderable object for template rendering.
    pub fn to_liquid_object(&self) -> liquid::Object {
        let value = serde_json::to_value(self).expect("ContextSnapshot always serializes");
        json_to_liquid_object(&value)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

fn json_to_liquid_object(value: &serde_json::Value) -> liquid::Object {
    match json_to_liquid_value(value) {
        liquid::model::Value::Object(obj) => obj,
        _ => liquid::Object::new(),
    }
}

fn json_to_liquid_value(value: &serde_json::Value) -> liquid::model::Value {
    use liquid::model::Value as LV;
    match value {
        serde_json::Value::Null => LV::Nil,
        serde_json::Value::Bool(b) => LV::scalar(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LV::scalar(i)
            } else {
                LV::scalar(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => LV::scalar(s.clone()),
        serde_json::Value::Array(items) => {
            LV::Array(items.iter().map(json_to_liquid_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut obj = liquid::Object::new();
            for (k, v) in map {
                obj.insert(k.clone().into(), json_to_liquid_value(v));
            }
            LV::Object(obj)
        }
    }
}

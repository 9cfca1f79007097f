//! Exercises the pipeline from a raw config document through to a
//! session's filtered view, without spinning up real downstream
//! connections (those are covered by the per-module unit tests that use a
//! real subprocess/transport).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use aggmcp_common::fs_utils::RealFileSystem;
use aggmcp_config::{diff_configs, ConfigLoader, ContextSnapshot};
use aggmcp_proxy::capabilities::{CapabilityAggregator, ConnectionCapabilities};
use aggmcp_proxy::filter::{apply_filter, resolve_query};
use aggmcp_proxy::presets::PresetStore;
use aggmcp_proxy::session::{SessionRecord, SessionStore, SessionStoreConfig, TagFilterMode};

fn tool(name: &str) -> rmcp::model::Tool {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "inputSchema": { "type": "object", "properties": {} },
    }))
    .expect("minimal Tool JSON should deserialize")
}

#[tokio::test]
async fn loading_a_config_then_filtering_by_tag_only_shows_matching_servers() {
    let raw = r#"{
        "mcpServers": {
            "prod-search": { "command": "search-server", "tags": ["prod", "search"] },
            "dev-search":  { "command": "search-server", "tags": ["dev", "search"] }
        }
    }"#;

    let loader = ConfigLoader::new(true, false).unwrap();
    let outcome = loader.load_str(raw, Path::new("mcp.json"), &ContextSnapshot::default()).unwrap();
    assert_eq!(outcome.servers.len(), 2);

    let capabilities = CapabilityAggregator::new();
    let mut prod_caps = ConnectionCapabilities::default();
    prod_caps.tools.insert("prod_search_tool".to_string(), tool("prod_search_tool"));
    capabilities.update_connection("prod-search", prod_caps);

    let mut dev_caps = ConnectionCapabilities::default();
    dev_caps.tools.insert("dev_search_tool".to_string(), tool("dev_search_tool"));
    capabilities.update_connection("dev-search", dev_caps);

    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(RealFileSystem);
    let presets = PresetStore::new(fs.clone(), dir.path().to_path_buf());

    let mut session = SessionRecord::new("s1", std::time::Duration::from_secs(60));
    session.tags = Some(vec!["prod".to_string()]);
    session.tag_filter_mode = TagFilterMode::SimpleOr;

    let query = resolve_query(&session, &presets).unwrap();
    let aggregate = capabilities.current();

    let mut server_tags: BTreeMap<String, HashSet<String>> = BTreeMap::new();
    for (name, server) in outcome.servers.iter() {
        server_tags.insert(name.clone(), server.tags.clone());
    }

    let filtered = apply_filter(&query, &aggregate, &server_tags);
    assert_eq!(filtered.tool_names, std::iter::once("prod_search_tool".to_string()).collect());
}

#[tokio::test]
async fn dual_trigger_session_persistence_survives_across_store_instances() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(RealFileSystem);
    let config = SessionStoreConfig {
        persist_requests: 1,
        ..SessionStoreConfig::default()
    };
    let store = SessionStore::new(fs.clone(), dir.path().to_path_buf(), config);
    store.get_or_create("s1");

    let reloaded = SessionStore::new(fs, dir.path().to_path_buf(), SessionStoreConfig::default());
    let record = reloaded.get_or_create("s1");
    assert_eq!(record.session_id, "s1");
}

#[test]
fn identical_config_reload_yields_zero_change_records() {
    let raw = r#"{ "mcpServers": { "a": { "command": "echo" } } }"#;
    let loader = ConfigLoader::new(false, false).unwrap();
    let outcome = loader.load_str(raw, Path::new("mcp.json"), &ContextSnapshot::default()).unwrap();
    let diff = diff_configs(&outcome.servers, &outcome.servers);
    assert!(diff.changes.is_empty());
}

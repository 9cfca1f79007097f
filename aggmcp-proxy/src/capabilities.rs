//! Capability Aggregator: merges tool/resource/prompt capability sets from
//! every connected outbound, last-seen-wins on name conflicts, name-sorted
//! aggregation order for determinism.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use rmcp::model::{Prompt, Resource, Tool};
use tracing::warn;

/// Everything one connected server currently advertises, keyed by its own
/// server name in [`CapabilityAggregator::per_connection`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionCapabilities {
    pub tools: BTreeMap<String, Tool>,
    pub resources: BTreeMap<String, Resource>,
    pub prompts: BTreeMap<String, Prompt>,
    pub logging: bool,
    pub experimental: Vec<String>,
}

/// One entry in the aggregated set: the item plus which server it came
/// from.
#[derive(Debug, Clone)]
pub struct Provided<T> {
    pub value: T,
    pub provider_server_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateCapabilities {
    pub tools: BTreeMap<String, Provided<Tool>>,
    pub resources: BTreeMap<String, Provided<Resource>>,
    pub prompts: BTreeMap<String, Provided<Prompt>>,
    pub logging: bool,
    pub experimental: Vec<String>,
}

/// Added/removed/modified key sets vs. the previous aggregation pass, used
/// to decide whether to fire `listChanged` notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityChangeSet {
    pub tools_added: Vec<String>,
    pub tools_removed: Vec<String>,
    pub resources_added: Vec<String>,
    pub resources_removed: Vec<String>,
    pub prompts_added: Vec<String>,
    pub prompts_removed: Vec<String>,
}

impl CapabilityChangeSet {
    pub fn is_empty(&self) -> bool {
        self.tools_added.is_empty()
            && self.tools_removed.is_empty()
            && self.resources_added.is_empty()
            && self.resources_removed.is_empty()
            && self.prompts_added.is_empty()
            && self.prompts_removed.is_empty()
    }
}

pub struct CapabilityAggregator {
    per_connection: RwLock<BTreeMap<String, ConnectionCapabilities>>,
    current: RwLock<AggregateCapabilities>,
}

impl Default for CapabilityAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityAggregator {
    pub fn new() -> Self {
        Self {
            per_connection: RwLock::new(BTreeMap::new()),
            current: RwLock::new(AggregateCapabilities::default()),
        }
    }

    /// Replace one server's advertised capabilities (called after a
    /// successful connect or a server-initiated `listChanged`
    /// notification) and recompute the aggregate.
    pub fn update_connection(&self, name: &str, capabilities: ConnectionCapabilities) -> CapabilityChangeSet {
        self.per_connection
            .write()
            .expect("capability lock poisoned")
            .insert(name.to_string(), capabilities);
        self.recompute()
    }

    /// Remove a server entirely (disconnect or remove-server reload) and
    /// recompute the aggregate.
    pub fn remove_connection(&self, name: &str) -> CapabilityChangeSet {
        self.per_connection
            .write()
            .expect("capability lock poisoned")
            .remove(name);
        self.recompute()
    }

    pub fn current(&self) -> AggregateCapabilities {
        self.current.read().expect("capability lock poisoned").clone()
    }

    fn recompute(&self) -> CapabilityChangeSet {
        let per_connection = self.per_connection.read().expect("capability lock poisoned");
        let mut aggregate = AggregateCapabilities::default();

        // Iteration over a BTreeMap is already name-sorted, so "last seen
        // wins" is deterministic without any extra sort step.
        for (server_name, caps) in per_connection.iter() {
            merge_sub_map(&mut aggregate.tools, &caps.tools, server_name, "tool");
            merge_sub_map(&mut aggregate.resources, &caps.resources, server_name, "resource");
            merge_sub_map(&mut aggregate.prompts, &caps.prompts, server_name, "prompt");
            aggregate.logging |= caps.logging;
            for flag in &caps.experimental {
                if !aggregate.experimental.contains(flag) {
                    aggregate.experimental.push(flag.clone());
                }
            }
        }
        aggregate.experimental.sort();

        let mut current = self.current.write().expect("capability lock poisoned");
        let change_set = CapabilityChangeSet {
            tools_added: added_keys(&current.tools, &aggregate.tools),
            tools_removed: added_keys(&aggregate.tools, &current.tools),
            resources_added: added_keys(&current.resources, &aggregate.resources),
            resources_removed: added_keys(&aggregate.resources, &current.resources),
            prompts_added: added_keys(&current.prompts, &aggregate.prompts),
            prompts_removed: added_keys(&aggregate.prompts, &current.prompts),
        };
        *current = aggregate;
        change_set
    }
}

fn merge_sub_map<T: Clone>(
    into: &mut BTreeMap<String, Provided<T>>,
    from: &BTreeMap<String, T>,
    server_name: &str,
    kind: &str,
) {
    for (key, value) in from {
        if let Some(existing) = into.get(key) {
            if existing.provider_server_name != server_name {
                warn!(
                    kind,
                    key,
                    previous_provider = %existing.provider_server_name,
                    new_provider = %server_name,
                    "capability name conflict across servers, last-seen wins"
                );
            }
        }
        into.insert(
            key.clone(),
            Provided {
                value: value.clone(),
                provider_server_name: server_name.to_string(),
            },
        );
    }
}

fn added_keys<T, U>(old: &BTreeMap<String, T>, new: &BTreeMap<String, U>) -> Vec<String> {
    let old_keys: HashSet<&String> = old.keys().collect();
    new.keys().filter(|k| !old_keys.contains(k)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> Tool {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "inputSchema": { "type": "object", "properties": {} },
        }))
        .expect("minimal Tool JSON should deserialize")
    }

    #[test]
    fn merges_tools_from_multiple_servers() {
        let agg = CapabilityAggregator::new();
        let mut caps_a = ConnectionCapabilities::default();
        caps_a.tools.insert("search".into(), tool("search"));
        agg.update_connection("a", caps_a);

        let mut caps_b = ConnectionCapabilities::default();
        caps_b.tools.insert("fetch".into(), tool("fetch"));
        agg.update_connection("b", caps_b);

        let current = agg.current();
        assert_eq!(current.tools.len(), 2);
        assert_eq!(current.tools["search"].provider_server_name, "a");
        assert_eq!(current.tools["fetch"].provider_server_name, "b");
    }

    #[test]
    fn conflicting_tool_name_is_last_seen_wins_in_sorted_order() {
        let agg = CapabilityAggregator::new();
        let mut caps_a = ConnectionCapabilities::default();
        caps_a.tools.insert("search".into(), tool("search"));
        agg.update_connection("a", caps_a);

        let mut caps_b = ConnectionCapabilities::default();
        caps_b.tools.insert("search".into(), tool("search"));
        agg.update_connection("b", caps_b);

        // "a" sorts before "b", so recompute visits a then b: b wins.
        let current = agg.current();
        assert_eq!(current.tools["search"].provider_server_name, "b");
    }

    #[test]
    fn removing_a_connection_drops_its_contributions() {
        let agg = CapabilityAggregator::new();
        let mut caps_a = ConnectionCapabilities::default();
        caps_a.tools.insert("search".into(), tool("search"));
        agg.update_connection("a", caps_a);
        let change = agg.remove_connection("a");
        assert!(agg.current().tools.is_empty());
        assert_eq!(change.tools_removed, vec!["search".to_string()]);
    }

    #[test]
    fn change_set_reports_added_keys() {
        let agg = CapabilityAggregator::new();
        let mut caps_a = ConnectionCapabilities::default();
        caps_a.tools.insert("search".into(), tool("search"));
        let change = agg.update_connection("a", caps_a);
        assert_eq!(change.tools_added, vec!["search".to_string()]);
        assert!(change.tools_removed.is_empty());
    }

    #[test]
    fn identical_update_produces_empty_change_set() {
        let agg = CapabilityAggregator::new();
        let mut caps_a = ConnectionCapabilities::default();
        caps_a.tools.insert("search".into(), tool("search"));
        agg.update_connection("a", caps_a.clone());
        let change = agg.update_connection("a", caps_a);
        assert!(change.is_empty());
    }
}

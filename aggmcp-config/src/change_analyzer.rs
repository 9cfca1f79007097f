//! Change Analyzer: a pure diff between two validated configs — no I/O, no
//! async, so the Selective Reload Engine can call it synchronously on every
//! reload.

use crate::types::{ServerConfig, TransportKind, ValidatedConfig};
use std::collections::BTreeSet;

/// One detected difference between an old and a new server map.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeType {
    AddServer {
        name: String,
    },
    RemoveServer {
        name: String,
    },
    /// Any field other than transport kind or tags changed; the server
    /// must be reconnected.
    ModifyServer {
        name: String,
    },
    /// The transport kind itself changed (e.g. stdio -> http): always a
    /// full reconnect, never a partial field patch.
    TransportChange {
        name: String,
        old_kind: TransportKind,
        new_kind: TransportKind,
    },
    /// Only `tags` changed; downstream connection is left untouched, only
    /// the Session Filter's view of this server's tags needs updating.
    TagsChange {
        name: String,
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
    },
}

impl ChangeType {
    pub fn server_name(&self) -> &str {
        match self {
            ChangeType::AddServer { name }
            | ChangeType::RemoveServer { name }
            | ChangeType::ModifyServer { name }
            | ChangeType::TransportChange { name, .. }
            | ChangeType::TagsChange { name, .. } => name,
        }
    }

    /// Whether this change requires tearing down and reconnecting the
    /// outbound connection, as opposed to a metadata-only update.
    pub fn requires_reconnect(&self) -> bool {
        !matches!(self, ChangeType::TagsChange { .. })
    }
}

/// Summary counts used to pick a reload strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpactSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub transport_changed: usize,
    pub tags_only: usize,
}

impl ImpactSummary {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified + self.transport_changed + self.tags_only
    }

    /// True when every change is tags-only: no outbound connection needs
    /// to be touched.
    pub fn is_metadata_only(&self) -> bool {
        self.total() > 0
            && self.added == 0
            && self.removed == 0
            && self.modified == 0
            && self.transport_changed == 0
    }
}

/// Result of comparing an old and new config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDiff {
    pub changes: Vec<ChangeType>,
    pub impact: ImpactSummary,
}

/// Diff `old` against `new`, producing change records in stable
/// (name-sorted) order — both maps are `BTreeMap` already, so iteration
/// order is deterministic.
pub fn diff_configs(old: &ValidatedConfig, new: &ValidatedConfig) -> ConfigDiff {
    let mut changes = Vec::new();
    let mut impact = ImpactSummary::default();

    for (name, new_server) in new {
        match old.get(name) {
            None => {
                changes.push(ChangeType::AddServer { name: name.clone() });
                impact.added += 1;
            }
            Some(old_server) => {
                if let Some(change) = diff_server(name, old_server, new_server) {
                    match &change {
                        ChangeType::TransportChange { .. } => impact.transport_changed += 1,
                        ChangeType::ModifyServer { .. } => impact.modified += 1,
                        ChangeType::TagsChange { .. } => impact.tags_only += 1,
                        ChangeType::AddServer { .. } | ChangeType::RemoveServer { .. } => {
                            unreachable!("diff_server never returns add/remove")
                        }
                    }
                    changes.push(change);
                }
            }
        }
    }

    for name in old.keys() {
        if !new.contains_key(name) {
            changes.push(ChangeType::RemoveServer { name: name.clone() });
            impact.removed += 1;
        }
    }

    changes.sort_by(|a, b| a.server_name().cmp(b.server_name()));

    ConfigDiff { changes, impact }
}

/// Compare two versions of the same named server. Returns `None` when the
/// two configs are identical.
fn diff_server(name: &str, old: &ServerConfig, new: &ServerConfig) -> Option<ChangeType> {
    let old_kind = old.resolved_kind(name).ok();
    let new_kind = new.resolved_kind(name).ok();

    if old_kind != new_kind {
        if let (Some(old_kind), Some(new_kind)) = (old_kind, new_kind) {
            return Some(ChangeType::TransportChange {
                name: name.to_string(),
                old_kind,
                new_kind,
            });
        }
    }

    let mut old_without_tags = old.clone();
    let mut new_without_tags = new.clone();
    old_without_tags.tags.clear();
    new_without_tags.tags.clear();

    if old_without_tags != new_without_tags {
        return Some(ChangeType::ModifyServer {
            name: name.to_string(),
        });
    }

    if old.tags != new.tags {
        let added: BTreeSet<_> = new.tags.difference(&old.tags).cloned().collect();
        let removed: BTreeSet<_> = old.tags.difference(&new.tags).cloned().collect();
        return Some(ChangeType::TagsChange {
            name: name.to_string(),
            added,
            removed,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(command: &str) -> ServerConfig {
        ServerConfig {
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    fn tagged(command: &str, tags: &[&str]) -> ServerConfig {
        ServerConfig {
            command: Some(command.to_string()),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn detects_added_server() {
        let old = ValidatedConfig::new();
        let mut new = ValidatedConfig::new();
        new.insert("a".into(), server("echo"));
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.changes, vec![ChangeType::AddServer { name: "a".into() }]);
        assert_eq!(diff.impact.added, 1);
    }

    #[test]
    fn detects_removed_server() {
        let mut old = ValidatedConfig::new();
        old.insert("a".into(), server("echo"));
        let new = ValidatedConfig::new();
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.changes, vec![ChangeType::RemoveServer { name: "a".into() }]);
        assert_eq!(diff.impact.removed, 1);
    }

    #[test]
    fn detects_modified_command() {
        let mut old = ValidatedConfig::new();
        old.insert("a".into(), server("echo"));
        let mut new = ValidatedConfig::new();
        new.insert("a".into(), server("cat"));
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.changes, vec![ChangeType::ModifyServer { name: "a".into() }]);
        assert_eq!(diff.impact.modified, 1);
    }

    #[test]
    fn detects_transport_change() {
        let mut old = ValidatedConfig::new();
        old.insert("a".into(), server("echo"));
        let mut new = ValidatedConfig::new();
        new.insert(
            "a".into(),
            ServerConfig {
                url: Some("https://example.com/mcp".into()),
                ..Default::default()
            },
        );
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.impact.transport_changed, 1);
        assert!(matches!(diff.changes[0], ChangeType::TransportChange { .. }));
    }

    #[test]
    fn detects_tags_only_change() {
        let mut old = ValidatedConfig::new();
        old.insert("a".into(), tagged("echo", &["x"]));
        let mut new = ValidatedConfig::new();
        new.insert("a".into(), tagged("echo", &["y"]));
        let diff = diff_configs(&old, &new);
        assert_eq!(diff.impact.tags_only, 1);
        assert!(diff.impact.is_metadata_only());
        match &diff.changes[0] {
            ChangeType::TagsChange { added, removed, .. } => {
                assert_eq!(added, &BTreeSet::from([String::from("y")]));
                assert_eq!(removed, &BTreeSet::from([String::from("x")]));
            }
            other => panic!("expected TagsChange, got {other:?}"),
        }
    }

    #[test]
    fn identical_configs_produce_no_changes() {
        let mut old = ValidatedConfig::new();
        old.insert("a".into(), server("echo"));
        let new = old.clone();
        let diff = diff_configs(&old, &new);
        assert!(diff.changes.is_empty());
        assert_eq!(diff.impact.total(), 0);
    }

    #[test]
    fn changes_are_returned_in_name_sorted_order() {
        let mut old = ValidatedConfig::new();
        old.insert("z".into(), server("echo"));
        let mut new = ValidatedConfig::new();
        new.insert("a".into(), server("echo"));
        new.insert("m".into(), server("echo"));
        let diff = diff_configs(&old, &new);
        let names: Vec<_> = diff.changes.iter().map(|c| c.server_name()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }

    #[test]
    fn tags_change_does_not_require_reconnect() {
        let change = ChangeType::TagsChange {
            name: "a".into(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        };
        assert!(!change.requires_reconnect());
    }

    #[test]
    fn modify_change_requires_reconnect() {
        let change = ChangeType::ModifyServer { name: "a".into() };
        assert!(change.requires_reconnect());
    }
}

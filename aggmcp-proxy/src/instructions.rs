//! Instruction Aggregator: a pure, lazily-recomputed merge of each
//! connected server's textual instructions.

use std::collections::BTreeMap;
use std::sync::RwLock;

const SEPARATOR: &str = "\n\n---\n\n";

#[derive(Default)]
pub struct InstructionAggregator {
    by_server: RwLock<BTreeMap<String, String>>,
}

impl InstructionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, server_name: &str, instructions: Option<String>) {
        let mut map = self.by_server.write().expect("instructions lock poisoned");
        match instructions {
            Some(text) if !text.is_empty() => {
                map.insert(server_name.to_string(), text);
            }
            _ => {
                map.remove(server_name);
            }
        }
    }

    pub fn clear(&self, server_name: &str) {
        self.by_server
            .write()
            .expect("instructions lock poisoned")
            .remove(server_name);
    }

    /// Concatenate non-empty entries in stable name-sorted order.
    pub fn merged(&self) -> String {
        self.by_server
            .read()
            .expect("instructions lock poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }
}

//! Editing operations.
//!
//! Operations are the unit of persistence: each one the editor applies is
//! forwarded to the store, and replayed in order on restore. The serialized
//! form carries a `type` discriminant so the persistence layer can filter
//! selection-only operations without understanding the rest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::Node;

/// A single editing operation, addressed by node path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Insert `text` at a character offset inside a text leaf.
    InsertText {
        path: Vec<usize>,
        offset: usize,
        text: String,
    },
    /// Remove `text` at a character offset inside a text leaf. The removed
    /// characters must match `text`; replay is strict.
    RemoveText {
        path: Vec<usize>,
        offset: usize,
        text: String,
    },
    /// Insert a node so that it ends up at `path`.
    InsertNode { path: Vec<usize>, node: Node },
    /// Remove the node at `path`.
    RemoveNode { path: Vec<usize> },
    /// Merge properties into the node at `path`; a null value removes the
    /// property.
    SetNode {
        path: Vec<usize>,
        #[serde(default)]
        new_properties: Map<String, Value>,
    },
    /// Move the selection. Produces no content change and is skipped by the
    /// persistence binding.
    SetSelection {
        #[serde(default)]
        properties: Map<String, Value>,
    },
}

impl Operation {
    /// The serialized discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::InsertText { .. } => "insert_text",
            Operation::RemoveText { .. } => "remove_text",
            Operation::InsertNode { .. } => "insert_node",
            Operation::RemoveNode { .. } => "remove_node",
            Operation::SetNode { .. } => "set_node",
            Operation::SetSelection { .. } => "set_selection",
        }
    }
}

impl vellum_persist::EditorOperation for Operation {
    fn kind(&self) -> &str {
        Operation::kind(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_serialization() {
        let op = Operation::InsertText {
            path: vec![0, 0],
            offset: 5,
            text: "x".into(),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"type": "insert_text", "path": [0, 0], "offset": 5, "text": "x"})
        );
    }

    #[test]
    fn test_kind_matches_tag() {
        let ops = vec![
            Operation::InsertText {
                path: vec![],
                offset: 0,
                text: String::new(),
            },
            Operation::RemoveNode { path: vec![0] },
            Operation::SetSelection {
                properties: Map::new(),
            },
        ];
        for op in ops {
            let value = serde_json::to_value(&op).unwrap();
            assert_eq!(value["type"], json!(op.kind()));
        }
    }

    #[test]
    fn test_deserialize_foreign_selection_op() {
        // Selection shapes vary by editor; unknown properties are kept.
        let op: Operation = serde_json::from_value(json!({
            "type": "set_selection",
            "properties": {"anchor": {"path": [0, 0], "offset": 1}}
        }))
        .unwrap();
        assert_eq!(op.kind(), "set_selection");
    }
}

//! A minimal rich-text editor with sequential operation apply.
//!
//! Just enough editor to host the persistence binding: a node tree, a
//! selection, an undo history, and strict path-addressed application of
//! [`Operation`]s. Replay determinism matters more than editing ergonomics —
//! restoring a document replays persisted operations against the saved base
//! tree, so apply must either produce exactly the recorded effect or fail.

use serde_json::{Map, Value};

use crate::node::{self, Node};
use crate::operation::Operation;

/// Errors produced by operation application.
#[derive(Debug, Clone, PartialEq)]
pub enum EditError {
    /// Path does not resolve to a node (or sibling slot)
    InvalidPath(Vec<usize>),
    /// Character offset outside the addressed text
    InvalidOffset { path: Vec<usize>, offset: usize },
    /// Text operation addressed a non-text node
    NotText(Vec<usize>),
    /// Removed characters do not match the operation's text
    TextMismatch { path: Vec<usize> },
    /// Property cannot be set through `set_node`
    InvalidProperty(String),
    /// Content tree could not be deserialized
    InvalidContent(String),
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::InvalidPath(path) => write!(f, "invalid path {path:?}"),
            EditError::InvalidOffset { path, offset } => {
                write!(f, "offset {offset} out of range at {path:?}")
            }
            EditError::NotText(path) => write!(f, "node at {path:?} is not a text leaf"),
            EditError::TextMismatch { path } => {
                write!(f, "text at {path:?} does not match the operation")
            }
            EditError::InvalidProperty(name) => {
                write!(f, "property {name} cannot be set through set_node")
            }
            EditError::InvalidContent(e) => write!(f, "invalid content tree: {e}"),
        }
    }
}

impl std::error::Error for EditError {}

/// Byte position of the boundary after `offset` characters.
fn char_boundary(s: &str, offset: usize) -> Option<usize> {
    if let Some((byte, _)) = s.char_indices().nth(offset) {
        Some(byte)
    } else if offset == s.chars().count() {
        Some(s.len())
    } else {
        None
    }
}

/// An editable rich-text document.
#[derive(Debug, Default)]
pub struct RichTextEditor {
    children: Vec<Node>,
    selection: Option<Map<String, Value>>,
    /// Applied operations, cleared on restore
    history: Vec<Operation>,
    /// Operations since the last change notification
    pending: Vec<Operation>,
}

impl RichTextEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_children(children: Vec<Node>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn selection(&self) -> Option<&Map<String, Value>> {
        self.selection.as_ref()
    }

    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    /// Concatenated text of the whole document.
    pub fn plain_text(&self) -> String {
        node::plain_text(&self.children)
    }

    /// Apply an operation as a user edit: it lands in the undo history and
    /// in the pending batch for the next change notification.
    pub fn edit(&mut self, op: Operation) -> Result<(), EditError> {
        self.apply_op(&op)?;
        self.history.push(op.clone());
        self.pending.push(op);
        Ok(())
    }

    /// Take the operations accumulated since the last call.
    ///
    /// This is the batch a change notification hands to the persistence
    /// binding.
    pub fn take_pending(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.pending)
    }

    fn siblings_mut(&mut self, path: &[usize]) -> Result<(&mut Vec<Node>, usize), EditError> {
        let (&last, parent) = path
            .split_last()
            .ok_or_else(|| EditError::InvalidPath(path.to_vec()))?;
        let siblings = if parent.is_empty() {
            &mut self.children
        } else {
            match node::node_at_mut(&mut self.children, parent) {
                Some(Node::Element(el)) => &mut el.children,
                _ => return Err(EditError::InvalidPath(path.to_vec())),
            }
        };
        Ok((siblings, last))
    }

    fn text_at_mut(&mut self, path: &[usize]) -> Result<&mut crate::node::Text, EditError> {
        match node::node_at_mut(&mut self.children, path) {
            Some(Node::Text(text)) => Ok(text),
            Some(Node::Element(_)) => Err(EditError::NotText(path.to_vec())),
            None => Err(EditError::InvalidPath(path.to_vec())),
        }
    }

    fn apply_op(&mut self, op: &Operation) -> Result<(), EditError> {
        match op {
            Operation::InsertText { path, offset, text } => {
                let leaf = self.text_at_mut(path)?;
                let byte = char_boundary(&leaf.text, *offset).ok_or(EditError::InvalidOffset {
                    path: path.clone(),
                    offset: *offset,
                })?;
                leaf.text.insert_str(byte, text);
            }
            Operation::RemoveText { path, offset, text } => {
                let leaf = self.text_at_mut(path)?;
                let start = char_boundary(&leaf.text, *offset).ok_or(EditError::InvalidOffset {
                    path: path.clone(),
                    offset: *offset,
                })?;
                let end = char_boundary(&leaf.text, offset + text.chars().count()).ok_or(
                    EditError::InvalidOffset {
                        path: path.clone(),
                        offset: offset + text.chars().count(),
                    },
                )?;
                if &leaf.text[start..end] != text {
                    return Err(EditError::TextMismatch { path: path.clone() });
                }
                leaf.text.replace_range(start..end, "");
            }
            Operation::InsertNode { path, node } => {
                let (siblings, index) = self.siblings_mut(path)?;
                if index > siblings.len() {
                    return Err(EditError::InvalidPath(path.clone()));
                }
                siblings.insert(index, node.clone());
            }
            Operation::RemoveNode { path } => {
                let (siblings, index) = self.siblings_mut(path)?;
                if index >= siblings.len() {
                    return Err(EditError::InvalidPath(path.clone()));
                }
                siblings.remove(index);
            }
            Operation::SetNode {
                path,
                new_properties,
            } => {
                let target = node::node_at_mut(&mut self.children, path)
                    .ok_or_else(|| EditError::InvalidPath(path.clone()))?;
                for (name, value) in new_properties {
                    apply_property(target, name, value)?;
                }
            }
            Operation::SetSelection { properties } => {
                let selection = self.selection.get_or_insert_with(Map::new);
                for (name, value) in properties {
                    if value.is_null() {
                        selection.remove(name);
                    } else {
                        selection.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

fn apply_property(target: &mut Node, name: &str, value: &Value) -> Result<(), EditError> {
    // Structure is edited through node operations, not properties.
    if name == "text" || name == "children" {
        return Err(EditError::InvalidProperty(name.to_string()));
    }
    match target {
        Node::Element(el) if name == "type" => {
            el.kind = match value {
                Value::Null => None,
                Value::String(kind) => Some(kind.clone()),
                _ => return Err(EditError::InvalidProperty(name.to_string())),
            };
        }
        Node::Element(el) => {
            if value.is_null() {
                el.props.remove(name);
            } else {
                el.props.insert(name.to_string(), value.clone());
            }
        }
        Node::Text(t) => {
            if value.is_null() {
                t.marks.remove(name);
            } else {
                t.marks.insert(name.to_string(), value.clone());
            }
        }
    }
    Ok(())
}

impl vellum_persist::Editor for RichTextEditor {
    type Op = Operation;
    type Error = EditError;

    fn content(&self) -> Value {
        serde_json::to_value(&self.children).unwrap_or_default()
    }

    fn set_content(&mut self, content: Value) -> Result<(), EditError> {
        self.children =
            serde_json::from_value(content).map_err(|e| EditError::InvalidContent(e.to_string()))?;
        self.selection = None;
        Ok(())
    }

    // Replay path: no history, no pending batch, no notifications.
    fn apply(&mut self, op: &Operation) -> Result<(), EditError> {
        self.apply_op(op)
    }

    fn clear_history(&mut self) {
        self.history.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_persist::Editor as _;

    fn editor() -> RichTextEditor {
        RichTextEditor::with_children(vec![Node::element(
            "paragraph",
            vec![Node::text("Hello")],
        )])
    }

    #[test]
    fn test_insert_text_at_offset() {
        let mut e = editor();
        e.edit(Operation::InsertText {
            path: vec![0, 0],
            offset: 5,
            text: ", world".into(),
        })
        .unwrap();
        assert_eq!(e.plain_text(), "Hello, world");
    }

    #[test]
    fn test_insert_text_offsets_are_characters() {
        let mut e = RichTextEditor::with_children(vec![Node::text("héllo")]);
        e.edit(Operation::InsertText {
            path: vec![0],
            offset: 2,
            text: "X".into(),
        })
        .unwrap();
        assert_eq!(e.plain_text(), "héXllo");
    }

    #[test]
    fn test_insert_text_rejects_bad_targets() {
        let mut e = editor();
        let op = Operation::InsertText {
            path: vec![0],
            offset: 0,
            text: "x".into(),
        };
        assert_eq!(e.edit(op), Err(EditError::NotText(vec![0])));
        let op = Operation::InsertText {
            path: vec![0, 0],
            offset: 9,
            text: "x".into(),
        };
        assert!(matches!(e.edit(op), Err(EditError::InvalidOffset { .. })));
        // Failed edits leave no trace in history or pending.
        assert!(e.history().is_empty());
        assert!(e.take_pending().is_empty());
    }

    #[test]
    fn test_remove_text_is_strict() {
        let mut e = editor();
        e.edit(Operation::RemoveText {
            path: vec![0, 0],
            offset: 0,
            text: "He".into(),
        })
        .unwrap();
        assert_eq!(e.plain_text(), "llo");

        let op = Operation::RemoveText {
            path: vec![0, 0],
            offset: 0,
            text: "xx".into(),
        };
        assert_eq!(
            e.edit(op),
            Err(EditError::TextMismatch { path: vec![0, 0] })
        );
    }

    #[test]
    fn test_insert_and_remove_node() {
        let mut e = editor();
        e.edit(Operation::InsertNode {
            path: vec![1],
            node: Node::element("paragraph", vec![Node::text("Second")]),
        })
        .unwrap();
        assert_eq!(e.children().len(), 2);
        assert_eq!(e.plain_text(), "HelloSecond");

        e.edit(Operation::RemoveNode { path: vec![0] }).unwrap();
        assert_eq!(e.plain_text(), "Second");

        assert!(matches!(
            e.edit(Operation::RemoveNode { path: vec![5] }),
            Err(EditError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_set_node_merges_properties() {
        let mut e = editor();
        let mut props = Map::new();
        props.insert("align".to_string(), json!("right"));
        e.edit(Operation::SetNode {
            path: vec![0],
            new_properties: props,
        })
        .unwrap();

        let mut unset = Map::new();
        unset.insert("align".to_string(), Value::Null);
        unset.insert("type".to_string(), json!("heading"));
        e.edit(Operation::SetNode {
            path: vec![0],
            new_properties: unset,
        })
        .unwrap();

        let Node::Element(el) = &e.children()[0] else {
            panic!("expected element")
        };
        assert!(el.props.get("align").is_none());
        assert_eq!(el.kind.as_deref(), Some("heading"));
    }

    #[test]
    fn test_set_node_rejects_structural_properties() {
        let mut e = editor();
        let mut props = Map::new();
        props.insert("children".to_string(), json!([]));
        assert_eq!(
            e.edit(Operation::SetNode {
                path: vec![0],
                new_properties: props,
            }),
            Err(EditError::InvalidProperty("children".into()))
        );
    }

    #[test]
    fn test_set_selection_touches_no_content() {
        let mut e = editor();
        let mut props = Map::new();
        props.insert("anchor".to_string(), json!({"path": [0, 0], "offset": 2}));
        e.edit(Operation::SetSelection { properties: props }).unwrap();
        assert_eq!(e.plain_text(), "Hello");
        assert!(e.selection().is_some());
    }

    #[test]
    fn test_pending_batch_accumulates_in_order() {
        let mut e = editor();
        e.edit(Operation::InsertText {
            path: vec![0, 0],
            offset: 5,
            text: "!".into(),
        })
        .unwrap();
        e.edit(Operation::SetSelection {
            properties: Map::new(),
        })
        .unwrap();

        let pending = e.take_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].kind(), "insert_text");
        assert_eq!(pending[1].kind(), "set_selection");
        assert!(e.take_pending().is_empty());
        // History survives take_pending; it is only dropped on restore.
        assert_eq!(e.history().len(), 2);
    }

    #[test]
    fn test_content_roundtrip() {
        let mut e = editor();
        let tree = e.content();
        let mut other = RichTextEditor::new();
        other.set_content(tree).unwrap();
        assert_eq!(other.children(), e.children());

        assert!(matches!(
            other.set_content(json!({"not": "a tree"})),
            Err(EditError::InvalidContent(_))
        ));
    }

    #[test]
    fn test_replay_apply_bypasses_history() {
        let mut e = editor();
        e.apply(&Operation::InsertText {
            path: vec![0, 0],
            offset: 0,
            text: ">".into(),
        })
        .unwrap();
        assert_eq!(e.plain_text(), ">Hello");
        assert!(e.history().is_empty());
        assert!(e.take_pending().is_empty());
    }
}

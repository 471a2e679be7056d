//! Document tree model.
//!
//! A document is a list of nodes; a node is either an element with children
//! or a text leaf. The serialized form is plain JSON — the shape that the
//! persistence layer stores and exports verbatim:
//!
//! ```json
//! [{"type": "paragraph", "children": [{"text": "Hello", "bold": true}]}]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Element(Element),
    Text(Text),
}

/// An element: optional kind tag plus children and arbitrary properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub children: Vec<Node>,
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

/// A text leaf: the text itself plus arbitrary marks (bold, italic, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
    #[serde(flatten)]
    pub marks: Map<String, Value>,
}

impl Node {
    pub fn element(kind: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(Element {
            kind: Some(kind.into()),
            children,
            props: Map::new(),
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(Text {
            text: text.into(),
            marks: Map::new(),
        })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }
}

/// Resolve a path to a node. Paths address children by index, one level per
/// element.
pub fn node_at<'a>(nodes: &'a [Node], path: &[usize]) -> Option<&'a Node> {
    let (&first, rest) = path.split_first()?;
    let node = nodes.get(first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node {
        Node::Element(el) => node_at(&el.children, rest),
        Node::Text(_) => None,
    }
}

pub fn node_at_mut<'a>(nodes: &'a mut [Node], path: &[usize]) -> Option<&'a mut Node> {
    let (&first, rest) = path.split_first()?;
    let node = nodes.get_mut(first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node {
        Node::Element(el) => node_at_mut(&mut el.children, rest),
        Node::Text(_) => None,
    }
}

/// Concatenated text of every leaf under `nodes`, in document order.
pub fn plain_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(&t.text),
            Node::Element(el) => collect_text(&el.children, out),
        }
    }
}

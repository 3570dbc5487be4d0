//! Document tree - the JSON-shaped node model the editing widget works on.
//!
//! ```text
//! doc
//!  ├── paragraph
//!  │     ├── text "Hello "
//!  │     └── text "world"  [strong]
//!  └── bullet_list {tight}
//!        └── list_item
//!              └── paragraph …
//! ```
//!
//! Nodes serialize exactly like the widget's own JSON (`type`, `attrs`,
//! `content`, `text`, `marks`), so a persisted editor state can be handed
//! back to the widget unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DOC: &str = "doc";
pub const PARAGRAPH: &str = "paragraph";
pub const HEADING: &str = "heading";
pub const BLOCKQUOTE: &str = "blockquote";
pub const BULLET_LIST: &str = "bullet_list";
pub const ORDERED_LIST: &str = "ordered_list";
pub const LIST_ITEM: &str = "list_item";
pub const CODE_BLOCK: &str = "code_block";
pub const HORIZONTAL_RULE: &str = "horizontal_rule";
pub const IMAGE: &str = "image";
pub const HARD_BREAK: &str = "hard_break";
pub const TEXT: &str = "text";

pub const MARK_EM: &str = "em";
pub const MARK_STRONG: &str = "strong";
pub const MARK_CODE: &str = "code";
pub const MARK_STRIKETHROUGH: &str = "strikethrough";
pub const MARK_LINK: &str = "link";

/// Inline mark attached to a text node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
}

impl Mark {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Map::new(),
        }
    }

    pub fn link(href: impl Into<String>, title: Option<String>) -> Self {
        let mut attrs = Map::new();
        attrs.insert("href".into(), Value::String(href.into()));
        attrs.insert("title".into(), title.map_or(Value::Null, Value::String));
        Self {
            kind: MARK_LINK.into(),
            attrs,
        }
    }
}

/// A node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

impl Node {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Map::new(),
            content: Vec::new(),
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn doc(content: Vec<Node>) -> Self {
        Self::new(DOC).with_content(content)
    }

    pub fn paragraph(content: Vec<Node>) -> Self {
        Self::new(PARAGRAPH).with_content(content)
    }

    pub fn heading(level: u8, content: Vec<Node>) -> Self {
        Self::new(HEADING)
            .with_attr("level", Value::from(level))
            .with_content(content)
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut node = Self::new(TEXT);
        node.text = Some(text.into());
        node
    }

    pub fn marked_text(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        let mut node = Self::text(text);
        node.marks = marks;
        node
    }

    /// A document holding one empty paragraph, the widget's blank state.
    pub fn empty_doc() -> Self {
        Self::doc(vec![Self::paragraph(Vec::new())])
    }

    /// One paragraph per line; blank lines become empty paragraphs.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let content = lines
            .into_iter()
            .map(|line| {
                if line.is_empty() {
                    Self::paragraph(Vec::new())
                } else {
                    Self::paragraph(vec![Self::text(line)])
                }
            })
            .collect();
        Self::doc(content)
    }

    pub fn with_content(mut self, content: Vec<Node>) -> Self {
        self.content = content;
        self
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn is_text(&self) -> bool {
        self.kind == TEXT
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attrs.get(key).and_then(Value::as_u64)
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attrs.get(key).and_then(Value::as_bool)
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.content {
            child.collect_text(out);
        }
    }

    /// At most one child, and that child has no content.
    pub fn is_empty_doc(&self) -> bool {
        match self.content.as_slice() {
            [] => true,
            [only] => only.content.is_empty() && only.text.as_deref().unwrap_or("").is_empty(),
            _ => false,
        }
    }

    /// Merge adjacent text nodes that carry identical marks.
    pub fn normalized(mut self) -> Self {
        let mut merged: Vec<Node> = Vec::with_capacity(self.content.len());
        for child in self.content.drain(..) {
            let child = child.normalized();
            if child.is_text() && child.text.as_deref() == Some("") {
                continue;
            }
            match merged.last_mut() {
                Some(prev) if prev.is_text() && child.is_text() && prev.marks == child.marks => {
                    let tail = child.text.unwrap_or_default();
                    prev.text.get_or_insert_with(String::new).push_str(&tail);
                }
                _ => merged.push(child),
            }
        }
        self.content = merged;
        self
    }
}

/// Cursor position inside the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(rename = "type")]
    pub kind: SelectionKind,
    pub anchor: u32,
    pub head: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    Text,
    Node,
    All,
}

impl Selection {
    /// Collapsed cursor at the start of the first textblock.
    pub fn start() -> Self {
        Self {
            kind: SelectionKind::Text,
            anchor: 1,
            head: 1,
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::start()
    }
}

/// Full editor state as the widget persists it: document plus selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorText {
    pub doc: Node,
    #[serde(default)]
    pub selection: Selection,
}

impl EditorText {
    pub fn new(doc: Node) -> Self {
        Self {
            doc,
            selection: Selection::start(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Node::empty_doc())
    }

    pub fn is_empty(&self) -> bool {
        self.doc.is_empty_doc()
    }

    /// Structural shape check used at the storage boundary: an object
    /// carrying both a `doc` and a `selection`.
    pub fn looks_like(value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|obj| obj.contains_key("doc") && obj.contains_key("selection"))
    }
}

impl Default for EditorText {
    fn default() -> Self {
        Self::empty()
    }
}

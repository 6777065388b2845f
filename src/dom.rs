//! Captured document model.
//!
//! The live document is read once per walk by [`CAPTURE_SCRIPT`], which runs in
//! the page and returns every element and text node under `<body>` as a flat
//! arena in document order. Computed `display`/`visibility` are read at capture
//! time, so a capture is a consistent view of the page at one instant and is
//! never reused for a later walk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::refs::Locator;

/// Index of a node inside a [`DomTree`].
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Element,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedStyle {
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub visibility: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    #[serde(default)]
    pub kind: NodeKind,
    /// lowercase tag name, empty for text nodes
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub style: ComputedStyle,
    /// live `.value` of form controls (may differ from the attribute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_index: Option<i32>,
    #[serde(default)]
    pub has_click_handler: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// set when the page script threw while reading this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeId>,
}

impl DomNode {
    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::Text
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attribute value, ignoring empty and whitespace-only values.
    pub fn non_empty_attr(&self, name: &str) -> Option<&str> {
        self.attr(name).map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Flat arena of captured nodes; `root` is the document body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomTree {
    pub root: NodeId,
    pub nodes: Vec<DomNode>,
}

impl DomTree {
    pub fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(id)
    }

    pub fn root_node(&self) -> Option<&DomNode> {
        self.node(self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find the node a structural locator points at.
    pub fn resolve(&self, locator: &Locator) -> Option<NodeId> {
        let steps = locator.steps()?;
        let mut current = self.root;
        for nth in steps {
            let node = self.node(current)?;
            current = node
                .children
                .iter()
                .copied()
                .filter(|&child| self.node(child).is_some_and(DomNode::is_element))
                .nth(nth.checked_sub(1)?)?;
        }
        Some(current)
    }
}

/// What [`CAPTURE_SCRIPT`] returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedPage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub tree: DomTree,
}

impl CapturedPage {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// In-page capture function. Called with `{ skipTags: [...] }`; skipped tags are
/// recorded as bare stubs so `:nth-child` positions stay exact.
pub const CAPTURE_SCRIPT: &str = r"
(args) => {
    const skip = new Set((args && args.skipTags) || []);
    const nodes = [];

    function capture(node) {
        const id = nodes.length;
        if (node.nodeType === Node.TEXT_NODE) {
            nodes.push({ kind: 'text', text: node.textContent || '' });
            return id;
        }

        const el = node;
        const tag = el.tagName.toLowerCase();
        const record = { kind: 'element', tag, attributes: {}, children: [] };
        nodes.push(record);

        try {
            for (const attr of el.attributes) {
                record.attributes[attr.name] = attr.value;
            }
            if (skip.has(tag)) {
                return id;
            }

            const cs = window.getComputedStyle(el);
            record.style = { display: cs.display, visibility: cs.visibility };

            if (typeof el.value === 'string') record.value = el.value;
            if (typeof el.checked === 'boolean') record.checked = el.checked;
            if (typeof el.selected === 'boolean') record.selected = el.selected;
            if (typeof el.tabIndex === 'number') record.tabIndex = el.tabIndex;
            record.hasClickHandler =
                typeof el.onclick === 'function' || el.hasAttribute('onclick');

            for (const child of el.childNodes) {
                if (child.nodeType === Node.ELEMENT_NODE || child.nodeType === Node.TEXT_NODE) {
                    record.children.push(capture(child));
                }
            }
        } catch (e) {
            record.error = String(e);
        }
        return id;
    }

    const body = document.body || document.documentElement;
    const root = capture(body);
    return { root, nodes, title: document.title || '', url: location.href };
}
";

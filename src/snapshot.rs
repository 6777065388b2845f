//! Snapshot generation: walk a captured document in order, describe the
//! elements worth describing, and bind references to the ones an agent can
//! target.
//!
//! Output follows this layout:
//!
//! ```text
//! - Page Title: Example
//! - Page Snapshot
//! ```yaml
//! - document [ref=s1e1]:
//!   - heading "Example Domain" [level=1]:
//!     - text: Example Domain
//!   - link "More information..." [ref=s1e2]:
//!     - /url: https://www.iana.org/domains/example
//! ```
//! ```

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::classify::{self, Classification, NodeAttribute};
use crate::dom::{CapturedPage, DomNode, DomTree, NodeId, CAPTURE_SCRIPT};
use crate::driver::BrowserDriver;
use crate::error::ActionError;
use crate::refs::{Locator, RefTable, Reference};

// deeper subtrees are dropped rather than risk the stack
const MAX_DEPTH: usize = 512;

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("node {0} missing from capture")]
    MissingNode(NodeId),
    #[error("<{tag}> could not be captured: {reason}")]
    CaptureFailed { tag: String, reason: String },
    #[error("document deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutlineLine {
    Element {
        depth: usize,
        role: String,
        reference: Option<Reference>,
        text: Option<String>,
        attributes: Vec<NodeAttribute>,
        url: Option<String>,
    },
    Text {
        depth: usize,
        text: String,
    },
}

impl OutlineLine {
    pub fn depth(&self) -> usize {
        match self {
            OutlineLine::Element { depth, .. } | OutlineLine::Text { depth, .. } => *depth,
        }
    }

    pub fn reference(&self) -> Option<&Reference> {
        match self {
            OutlineLine::Element { reference, .. } => reference.as_ref(),
            OutlineLine::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub title: String,
    pub url: String,
    /// the full text handed to the agent
    pub text: String,
    /// references issued, including the document root
    pub reference_count: usize,
    pub lines: Vec<OutlineLine>,
}

impl Snapshot {
    /// Whether `needle` occurs in the page's text or in an element's quoted
    /// name. Roles, references, urls and the title are not searched.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| match line {
            OutlineLine::Text { text, .. } => text.contains(needle),
            OutlineLine::Element { text, .. } => {
                text.as_deref().is_some_and(|t| t.contains(needle))
            }
        })
    }
}

/// Read the live document once.
pub async fn capture<D: BrowserDriver + ?Sized>(driver: &D) -> Result<CapturedPage, ActionError> {
    let raw = driver
        .run_in_page(CAPTURE_SCRIPT, json!({ "skipTags": classify::SKIPPED_TAGS }))
        .await?;
    CapturedPage::from_value(raw).map_err(|e| ActionError::Capture(e.to_string()))
}

/// Reset `table`, walk `page` and render the snapshot.
pub fn generate(page: &CapturedPage, table: &mut RefTable) -> Snapshot {
    table.reset();
    let lines = walk(&page.tree, table);
    let outline = render_outline(&lines);

    let text = format!(
        "- Page Title: {}\n- Page Snapshot\n```yaml\n{outline}```\n",
        page.title
    );

    debug!(
        lines = lines.len(),
        references = table.len(),
        nodes = page.tree.len(),
        "snapshot generated"
    );

    Snapshot {
        title: page.title.clone(),
        url: page.url.clone(),
        text,
        reference_count: table.len(),
        lines,
    }
}

/// Walk the tree from its root, allocating references into `table`. The root
/// becomes the `document` line and always takes the first reference.
pub fn walk(tree: &DomTree, table: &mut RefTable) -> Vec<OutlineLine> {
    let root_tag = tree
        .root_node()
        .map(|n| n.tag.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or("body");
    let root_locator = Locator::root(root_tag);

    let mut walker = Walker {
        tree,
        table,
        index: DescendantIndex::build(tree),
        lines: Vec::new(),
    };

    let reference = walker.table.allocate(root_locator.clone());
    walker.lines.push(OutlineLine::Element {
        depth: 0,
        role: "document".to_string(),
        reference: Some(reference),
        text: None,
        attributes: Vec::new(),
        url: None,
    });

    if tree
        .root_node()
        .is_some_and(|root| !classify::is_hidden(root))
    {
        walker.walk_children(tree.root, &root_locator, 1);
    }

    walker.lines
}

pub fn render_outline(lines: &[OutlineLine]) -> String {
    let mut output = String::new();

    for (i, line) in lines.iter().enumerate() {
        let indent = "  ".repeat(line.depth());
        match line {
            OutlineLine::Text { text, .. } => {
                output.push_str(&format!("{indent}- text: {text}\n"));
            }
            OutlineLine::Element {
                depth,
                role,
                reference,
                text,
                attributes,
                url,
            } => {
                let mut desc = format!("{indent}- {role}");
                if let Some(text) = text {
                    desc.push_str(&format!(" \"{}\"", quote(text)));
                }
                for attr in attributes {
                    desc.push_str(&format!(" {attr}"));
                }
                if let Some(reference) = reference {
                    desc.push_str(&format!(" [ref={reference}]"));
                }

                let nested =
                    url.is_some() || lines.get(i + 1).is_some_and(|next| next.depth() > *depth);
                if nested {
                    desc.push(':');
                }
                output.push_str(&desc);
                output.push('\n');

                if let Some(url) = url {
                    output.push_str(&format!("{indent}  - /url: {url}\n"));
                }
            }
        }
    }

    output
}

fn quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Per-walk facts about what sits below each node (visible subtrees only).
struct DescendantIndex {
    interactive_below: Vec<bool>,
    content_below: Vec<bool>,
}

impl DescendantIndex {
    // the capture lists parents before children, so a reverse sweep sees every
    // child before its parent
    fn build(tree: &DomTree) -> Self {
        let len = tree.len();
        let mut interactive_below = vec![false; len];
        let mut content_below = vec![false; len];

        for id in (0..len).rev() {
            let Some(node) = tree.node(id) else { continue };
            for &child in node.children.iter().filter(|&&c| c > id && c < len) {
                let Some(kid) = tree.node(child) else { continue };
                if !kid.is_element() || classify::is_skipped(kid) || classify::is_hidden(kid) {
                    continue;
                }
                let kid_interactive = classify::is_interactive(kid);
                interactive_below[id] |= kid_interactive || interactive_below[child];
                content_below[id] |=
                    kid_interactive || classify::is_media(kid) || content_below[child];
            }
        }

        Self {
            interactive_below,
            content_below,
        }
    }

    fn has_interactive_below(&self, id: NodeId) -> bool {
        self.interactive_below.get(id).copied().unwrap_or(false)
    }

    fn has_content_below(&self, id: NodeId) -> bool {
        self.content_below.get(id).copied().unwrap_or(false)
    }
}

struct Walker<'a> {
    tree: &'a DomTree,
    table: &'a mut RefTable,
    index: DescendantIndex,
    lines: Vec<OutlineLine>,
}

impl Walker<'_> {
    fn walk_children(&mut self, parent: NodeId, locator: &Locator, depth: usize) {
        let tree = self.tree;
        let Some(node) = tree.node(parent) else { return };

        let mut position = 0;
        for &child in &node.children {
            let child_locator = if tree.node(child).is_some_and(DomNode::is_element) {
                position += 1;
                locator.child(position)
            } else {
                locator.clone()
            };

            // a failing subtree contributes nothing, the rest of the walk goes on
            let line_mark = self.lines.len();
            let ref_mark = self.table.checkpoint();
            if let Err(err) = self.visit(child, &child_locator, depth) {
                debug!(node = child, locator = %child_locator, error = %err, "subtree dropped from snapshot");
                self.lines.truncate(line_mark);
                self.table.rollback(ref_mark);
            }
        }
    }

    fn visit(&mut self, id: NodeId, locator: &Locator, depth: usize) -> Result<(), WalkError> {
        if depth > MAX_DEPTH {
            return Err(WalkError::TooDeep);
        }
        let tree = self.tree;
        let node = tree.node(id).ok_or(WalkError::MissingNode(id))?;

        if node.is_text() {
            let text = classify::clean_text(node.text.as_deref().unwrap_or_default());
            if !text.is_empty() {
                self.lines.push(OutlineLine::Text { depth, text });
            }
            return Ok(());
        }

        if classify::is_skipped(node) || classify::is_hidden(node) {
            return Ok(());
        }
        if let Some(reason) = &node.error {
            return Err(WalkError::CaptureFailed {
                tag: node.tag.clone(),
                reason: reason.clone(),
            });
        }

        let class = classify::classify(tree, id).ok_or(WalkError::MissingNode(id))?;
        if self.deserves_line(id, node, &class) {
            let reference = self
                .needs_reference(id, node, &class)
                .then(|| self.table.allocate(locator.clone()));
            let url = if node.tag == "a" {
                node.non_empty_attr("href").map(str::to_string)
            } else {
                None
            };

            let Classification {
                role,
                visible_text,
                attributes,
                ..
            } = class;
            self.lines.push(OutlineLine::Element {
                depth,
                role,
                reference,
                text: (!visible_text.is_empty()).then_some(visible_text),
                attributes,
                url,
            });
        }

        self.walk_children(id, locator, depth + 1);
        Ok(())
    }

    fn deserves_line(&self, id: NodeId, node: &DomNode, class: &Classification) -> bool {
        class.is_interactive || class.is_semantic || self.has_important_content(id, node)
    }

    fn has_important_content(&self, id: NodeId, node: &DomNode) -> bool {
        let has_child_elements = node.children.iter().any(|&c| {
            self.tree.node(c).is_some_and(|kid| {
                kid.is_element() && !classify::is_skipped(kid) && !classify::is_hidden(kid)
            })
        });
        has_child_elements
            || !classify::direct_text(self.tree, node).is_empty()
            || self.index.has_content_below(id)
    }

    fn needs_reference(&self, id: NodeId, node: &DomNode, class: &Classification) -> bool {
        if class.is_interactive {
            return true;
        }
        classify::is_container(node)
            && (node.non_empty_attr("id").is_some()
                || node.non_empty_attr("class").is_some()
                || self.index.has_interactive_below(id))
    }
}

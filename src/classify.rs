//! Per-node classification: visibility, interactivity, semantic weight, display
//! role and visible text. Everything here is a pure function of the captured
//! node; nothing is remembered between calls.

use std::fmt;

use crate::dom::{DomNode, DomTree, NodeId};

/// Never walked, never described.
pub const SKIPPED_TAGS: &[&str] = &["script", "style", "meta", "link", "head"];

const INTERACTIVE_TAGS: &[&str] = &["button", "input", "select", "textarea", "a", "img"];

// widget roles that make any element actionable
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "checkbox", "radio", "option", "link", "menuitem", "tab", "switch", "textbox",
    "combobox",
];

const SEMANTIC_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "header", "footer", "nav", "main", "section", "article",
    "aside", "form", "ul", "ol", "li", "dl", "dt", "dd", "p", "table", "tr", "th", "td",
    "label", "blockquote",
];

const MEDIA_TAGS: &[&str] = &["img", "video", "audio", "canvas", "svg", "picture", "iframe"];

/// List, paragraph and generic container tags that get a reference when they
/// are identifiable (id/class) or wrap something interactive.
pub const CONTAINER_TAGS: &[&str] = &["ul", "ol", "li", "p", "div"];

/// Explicit ARIA roles that replace the tag-derived role.
const ROLE_OVERRIDES: &[&str] = &[
    "checkbox", "button", "listbox", "option", "heading", "list", "listitem",
];

/// How a matching rule names the role.
#[derive(Clone, Copy)]
pub enum RoleOutcome {
    Fixed(&'static str),
    Derived(fn(&DomNode) -> String),
}

#[derive(Clone, Copy)]
pub struct RoleRule {
    pub name: &'static str,
    pub applies: fn(&DomNode) -> bool,
    pub outcome: RoleOutcome,
}

const fn fixed(name: &'static str, applies: fn(&DomNode) -> bool, role: &'static str) -> RoleRule {
    RoleRule {
        name,
        applies,
        outcome: RoleOutcome::Fixed(role),
    }
}

const fn derived(
    name: &'static str,
    applies: fn(&DomNode) -> bool,
    derive: fn(&DomNode) -> String,
) -> RoleRule {
    RoleRule {
        name,
        applies,
        outcome: RoleOutcome::Derived(derive),
    }
}

/// Display role rules, evaluated top to bottom; the first match wins. The
/// explicit-role rule comes before every tag rule.
pub const ROLE_RULES: &[RoleRule] = &[
    derived("explicit-role", has_role_override, explicit_role),
    derived("input", is_tag_input, input_role),
    fixed("select", is_tag_select, "combobox"),
    fixed("option", is_tag_option, "option"),
    fixed("textarea", is_tag_textarea, "textbox"),
    fixed("button", is_tag_button, "button"),
    fixed("anchor", is_tag_anchor, "link"),
    fixed("image", is_tag_img, "img"),
    fixed("heading", is_heading_tag, "heading"),
    fixed("list", is_list_tag, "list"),
    fixed("listitem", is_tag_li, "listitem"),
    fixed("paragraph", is_tag_p, "paragraph"),
];

/// Extra state shown after the quoted text, e.g. `[level=2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAttribute {
    Level(u8),
    Selected,
    Checked,
    Required,
}

impl fmt::Display for NodeAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAttribute::Level(level) => write!(f, "[level={level}]"),
            NodeAttribute::Selected => f.write_str("[selected=true]"),
            NodeAttribute::Checked => f.write_str("[checked=true]"),
            NodeAttribute::Required => f.write_str("[required=true]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_hidden: bool,
    pub is_interactive: bool,
    pub is_semantic: bool,
    pub role: String,
    pub visible_text: String,
    pub attributes: Vec<NodeAttribute>,
}

/// Classify one element. Text nodes and dangling ids yield `None`.
pub fn classify(tree: &DomTree, id: NodeId) -> Option<Classification> {
    let node = tree.node(id).filter(|n| n.is_element())?;
    Some(Classification {
        is_hidden: is_hidden(node),
        is_interactive: is_interactive(node),
        is_semantic: is_semantic(node),
        role: role(node),
        visible_text: visible_text(tree, id),
        attributes: attributes(node),
    })
}

pub fn is_skipped(node: &DomNode) -> bool {
    node.is_element() && SKIPPED_TAGS.contains(&node.tag.as_str())
}

/// Hidden by its own computed style.
pub fn is_hidden(node: &DomNode) -> bool {
    node.is_element()
        && (node.style.display == "none"
            || node.style.visibility == "hidden"
            || node.style.visibility == "collapse")
}

/// Hidden by its own style or the style of any ancestor. `ancestors` runs from
/// the root down to the parent of `id`.
pub fn is_hidden_within(tree: &DomTree, ancestors: &[NodeId], id: NodeId) -> bool {
    ancestors
        .iter()
        .chain(std::iter::once(&id))
        .filter_map(|&a| tree.node(a))
        .any(is_hidden)
}

pub fn is_interactive(node: &DomNode) -> bool {
    if !node.is_element() {
        return false;
    }
    if INTERACTIVE_TAGS.contains(&node.tag.as_str()) || node.has_click_handler {
        return true;
    }
    if aria_role(node).is_some_and(|r| INTERACTIVE_ROLES.contains(&r.as_str())) {
        return true;
    }
    node.tab_index.is_some_and(|t| t >= 0)
}

pub fn is_semantic(node: &DomNode) -> bool {
    node.is_element() && SEMANTIC_TAGS.contains(&node.tag.as_str())
}

pub fn is_media(node: &DomNode) -> bool {
    node.is_element() && MEDIA_TAGS.contains(&node.tag.as_str())
}

pub fn is_container(node: &DomNode) -> bool {
    node.is_element() && CONTAINER_TAGS.contains(&node.tag.as_str())
}

pub fn role(node: &DomNode) -> String {
    match ROLE_RULES.iter().find(|rule| (rule.applies)(node)) {
        Some(RoleRule {
            outcome: RoleOutcome::Fixed(role),
            ..
        }) => (*role).to_string(),
        Some(RoleRule {
            outcome: RoleOutcome::Derived(derive),
            ..
        }) => derive(node),
        None => node.tag.clone(),
    }
}

/// Text an agent would read for this element.
pub fn visible_text(tree: &DomTree, id: NodeId) -> String {
    let Some(node) = tree.node(id) else {
        return String::new();
    };
    if node.is_text() {
        return clean_text(node.text.as_deref().unwrap_or_default());
    }

    match node.tag.as_str() {
        "img" => first_non_empty([node.attr("alt"), node.attr("title")]),
        "input" => first_non_empty([
            node.attr("placeholder"),
            node.value.as_deref().or_else(|| node.attr("value")),
            node.attr("aria-label"),
        ]),
        "select" => first_non_empty([node.attr("aria-label")]),
        _ => direct_text(tree, node),
    }
}

/// Concatenated direct text-node children, whitespace collapsed.
pub fn direct_text(tree: &DomTree, node: &DomNode) -> String {
    let raw: Vec<&str> = node
        .children
        .iter()
        .filter_map(|&c| tree.node(c))
        .filter(|c| c.is_text())
        .filter_map(|c| c.text.as_deref())
        .collect();
    clean_text(&raw.join(" "))
}

pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn attributes(node: &DomNode) -> Vec<NodeAttribute> {
    let mut attrs = Vec::new();

    if let Some(level) = heading_level(node) {
        attrs.push(NodeAttribute::Level(level));
    }
    if node.selected == Some(true) || node.attr("aria-selected") == Some("true") {
        attrs.push(NodeAttribute::Selected);
    }
    if node.checked == Some(true) || node.attr("aria-checked") == Some("true") {
        attrs.push(NodeAttribute::Checked);
    }
    if node.attributes.contains_key("required") || node.attr("aria-required") == Some("true") {
        attrs.push(NodeAttribute::Required);
    }

    attrs
}

fn heading_level(node: &DomNode) -> Option<u8> {
    if is_heading_tag(node) {
        return node.tag[1..].parse().ok();
    }
    node.non_empty_attr("aria-level")?.parse().ok()
}

fn first_non_empty<const N: usize>(candidates: [Option<&str>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(clean_text)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

fn aria_role(node: &DomNode) -> Option<String> {
    node.non_empty_attr("role").map(str::to_lowercase)
}

fn has_role_override(node: &DomNode) -> bool {
    aria_role(node).is_some_and(|r| ROLE_OVERRIDES.contains(&r.as_str()))
}

fn explicit_role(node: &DomNode) -> String {
    aria_role(node).unwrap_or_default()
}

fn input_role(node: &DomNode) -> String {
    let kind = node
        .non_empty_attr("type")
        .map_or_else(|| "text".to_string(), str::to_lowercase);
    match kind.as_str() {
        "checkbox" => "checkbox",
        "radio" => "radio",
        "submit" | "button" | "reset" | "image" => "button",
        "range" => "slider",
        "number" => "spinbutton",
        "search" => "searchbox",
        _ => "textbox",
    }
    .to_string()
}

fn is_tag_input(node: &DomNode) -> bool {
    node.tag == "input"
}

fn is_tag_select(node: &DomNode) -> bool {
    node.tag == "select"
}

fn is_tag_option(node: &DomNode) -> bool {
    node.tag == "option"
}

fn is_tag_textarea(node: &DomNode) -> bool {
    node.tag == "textarea"
}

fn is_tag_button(node: &DomNode) -> bool {
    node.tag == "button"
}

fn is_tag_anchor(node: &DomNode) -> bool {
    node.tag == "a"
}

fn is_tag_img(node: &DomNode) -> bool {
    node.tag == "img"
}

fn is_heading_tag(node: &DomNode) -> bool {
    matches!(node.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn is_list_tag(node: &DomNode) -> bool {
    matches!(node.tag.as_str(), "ul" | "ol")
}

fn is_tag_li(node: &DomNode) -> bool {
    node.tag == "li"
}

fn is_tag_p(node: &DomNode) -> bool {
    node.tag == "p"
}

// in-memory browser used by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::dom::{CapturedPage, ComputedStyle, DomNode, DomTree, NodeId, NodeKind};
use crate::driver::{BrowserDriver, Interaction, PageInfo};
use crate::error::DriverError;
use crate::refs::Locator;

/// Build a page from a nested fixture. Strings are text nodes; objects accept
/// `tag`, `attrs`, `hidden`, `invisible`, `value`, `checked`, `selected`,
/// `tabIndex`, `onclick`, `error` and `children`.
pub fn page(title: &str, url: &str, body_children: &Value) -> CapturedPage {
    let mut nodes = Vec::new();
    let body = serde_json::json!({ "tag": "body", "children": body_children });
    let root = push(&mut nodes, &body);
    CapturedPage {
        title: title.to_string(),
        url: url.to_string(),
        tree: DomTree { root, nodes },
    }
}

fn push(nodes: &mut Vec<DomNode>, value: &Value) -> NodeId {
    let id = nodes.len();
    match value {
        Value::String(text) => {
            nodes.push(DomNode {
                kind: NodeKind::Text,
                text: Some(text.clone()),
                ..Default::default()
            });
        }
        Value::Object(map) => {
            let str_field = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
            let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);

            let attributes = map
                .get("attrs")
                .and_then(Value::as_object)
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                        .collect()
                })
                .unwrap_or_default();

            let style = ComputedStyle {
                display: if flag("hidden") { "none" } else { "block" }.to_string(),
                visibility: if flag("invisible") { "hidden" } else { "visible" }.to_string(),
            };

            nodes.push(DomNode {
                kind: NodeKind::Element,
                tag: str_field("tag").unwrap_or_else(|| "div".to_string()),
                attributes,
                style,
                value: str_field("value"),
                checked: map.get("checked").and_then(Value::as_bool),
                selected: map.get("selected").and_then(Value::as_bool),
                tab_index: map
                    .get("tabIndex")
                    .and_then(Value::as_i64)
                    .and_then(|t| i32::try_from(t).ok()),
                has_click_handler: flag("onclick"),
                text: None,
                error: str_field("error"),
                children: Vec::new(),
            });

            let children: Vec<NodeId> = map
                .get("children")
                .and_then(Value::as_array)
                .map(|kids| kids.iter().map(|kid| push(nodes, kid)).collect())
                .unwrap_or_default();
            nodes[id].children = children;
        }
        other => panic!("unsupported fixture node: {other}"),
    }
    id
}

#[derive(Default)]
pub struct FakeState {
    pub pages: HashMap<String, CapturedPage>,
    pub current: String,
    /// (page url, locator css) -> url the interaction navigates to
    pub navigations: HashMap<(String, String), String>,
    pub detached: HashSet<String>,
    pub hang: bool,
    /// returned by `interact` and `navigate` after the page has already moved
    pub fail_after: Option<DriverError>,
    pub interactions: Vec<(Option<String>, Interaction)>,
    pub captures: usize,
}

#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page; the first one registered is the current page.
    pub fn with_page(self, page: CapturedPage) -> Self {
        {
            let mut state = self.state();
            if state.current.is_empty() {
                state.current.clone_from(&page.url);
            }
            state.pages.insert(page.url.clone(), page);
        }
        self
    }

    pub fn navigates_on(self, from: &str, locator: &Locator, to: &str) -> Self {
        self.state().navigations.insert(
            (from.to_string(), locator.as_css().to_string()),
            to.to_string(),
        );
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    type Handle = String;

    async fn navigate(&self, url: &str) -> Result<PageInfo, DriverError> {
        let mut state = self.state();
        let page = state
            .pages
            .get(url)
            .ok_or_else(|| DriverError::Protocol(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))?;
        let info = PageInfo {
            title: page.title.clone(),
            url: page.url.clone(),
        };
        state.current = url.to_string();
        match state.fail_after.take() {
            Some(err) => Err(err),
            None => Ok(info),
        }
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<String>, DriverError> {
        let state = self.state();
        let page = state
            .pages
            .get(&state.current)
            .ok_or_else(|| DriverError::Protocol("no page loaded".to_string()))?;
        Ok(page
            .tree
            .resolve(locator)
            .map(|_| locator.as_css().to_string()))
    }

    async fn interact(&self, handle: &String, interaction: &Interaction) -> Result<(), DriverError> {
        let hang = self.state().hang;
        if hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        let mut state = self.state();
        if state.detached.contains(handle) {
            return Err(DriverError::Detached(
                "Node is detached from document".to_string(),
            ));
        }
        state
            .interactions
            .push((Some(handle.clone()), interaction.clone()));

        let key = (state.current.clone(), handle.clone());
        if let Some(target) = state.navigations.get(&key).cloned() {
            state.current = target;
        }
        match state.fail_after.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn interact_page(&self, interaction: &Interaction) -> Result<(), DriverError> {
        self.state().interactions.push((None, interaction.clone()));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state().current.clone())
    }

    async fn run_in_page(&self, _script: &str, _args: Value) -> Result<Value, DriverError> {
        let mut state = self.state();
        state.captures += 1;
        let page = state
            .pages
            .get(&state.current)
            .ok_or_else(|| DriverError::Script("document not ready".to_string()))?;
        serde_json::to_value(page).map_err(|e| DriverError::Script(e.to_string()))
    }
}

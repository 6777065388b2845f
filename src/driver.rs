use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::refs::Locator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
}

/// A concrete interaction handed to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interaction {
    Click { double: bool },
    Type { text: String, submit: bool },
    /// option values or labels; on non-`<select>` elements this clicks
    Select { values: Vec<String> },
    Hover,
    /// elements are scrolled into view; `delta_y` only applies to the page
    Scroll { delta_y: i64 },
    /// `Enter`, `Control+A`, ...
    PressKey { key: String },
    Clear,
}

/// The browser session collaborator. One driver instance drives one page.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    type Handle: Send + Sync;

    async fn navigate(&self, url: &str) -> Result<PageInfo, DriverError>;

    /// `Ok(None)` when the locator matches nothing in the current document.
    async fn locate(&self, locator: &Locator) -> Result<Option<Self::Handle>, DriverError>;

    async fn interact(
        &self,
        handle: &Self::Handle,
        interaction: &Interaction,
    ) -> Result<(), DriverError>;

    /// Interactions without a target element (key presses, page scroll).
    async fn interact_page(&self, interaction: &Interaction) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Evaluate `script` (a JS function expression) in the page with `args` as
    /// its single argument and return the JSON result.
    async fn run_in_page(
        &self,
        script: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, DriverError>;
}

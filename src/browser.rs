use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::Handler;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::driver::{BrowserDriver, Interaction, PageInfo};
use crate::error::DriverError;
use crate::refs::Locator;
use crate::session::Session;

// profile roots (under $HOME) that may hold a DevToolsActivePort file
const CHROME_PROFILES: &[&str] = &[
    "Library/Application Support/Google/Chrome",
    "Library/Application Support/Google/Chrome Canary",
    "Library/Application Support/Arc/User Data",
    "Library/Application Support/Chromium",
    ".config/google-chrome",
    ".config/chromium",
];

// chrome messages that mean the node went away under us
const DETACHED_MARKERS: &[&str] = &[
    "detached",
    "No node with given id",
    "Could not find node",
    "Could not compute box model",
    "Node is not",
    "Cannot find context",
];

/// A connected Chrome plus the task pumping its devtools socket.
pub struct BrowserClient {
    browser: Browser,
    _handler_task: tokio::task::JoinHandle<()>,
    config: Config,
}

impl BrowserClient {
    /// Attach to `config.ws_url`, else to a running Chrome with remote debugging,
    /// else launch one with a dedicated profile.
    pub async fn connect(config: Config) -> Result<Self> {
        let existing = match &config.ws_url {
            Some(url) => Some(url.clone()),
            None => try_find_existing_chrome().await,
        };

        if let Some(ws_url) = existing {
            info!(url = %ws_url, "connecting to existing Chrome");
            match Browser::connect(&ws_url).await {
                Ok((browser, handler)) => return Ok(Self::start(browser, handler, config)),
                Err(e) => warn!(url = %ws_url, error = %e, "failed to connect to existing Chrome"),
            }
        }

        info!(profile = %config.profile_dir.display(), headless = config.headless, "launching Chrome");
        let (browser, handler) = launch_chrome_with_profile(&config).await?;
        Ok(Self::start(browser, handler, config))
    }

    fn start(browser: Browser, handler: Handler, config: Config) -> Self {
        let handler_task = tokio::spawn(async move {
            handler_loop(handler).await;
        });
        Self {
            browser,
            _handler_task: handler_task,
            config,
        }
    }

    pub async fn list_pages(&self) -> Result<Vec<PageInfo>> {
        let pages = self.browser.pages().await.context("failed to list pages")?;
        let mut infos = Vec::with_capacity(pages.len());
        for page in &pages {
            infos.push(PageInfo {
                title: page.get_title().await?.unwrap_or_default(),
                url: page.url().await?.unwrap_or_default(),
            });
        }
        Ok(infos)
    }

    /// Open a new tab at `url` and start a session on it.
    pub async fn open(&self, url: &str) -> Result<Session<ChromePage>> {
        let page = self
            .browser
            .new_page(url)
            .await
            .with_context(|| format!("failed to open {url}"))?;
        Ok(Session::new(ChromePage::new(page), self.config.clone()))
    }

    /// Start a session on an already open tab (index as in [`BrowserClient::list_pages`]).
    pub async fn attach(&self, index: usize) -> Result<Session<ChromePage>> {
        let mut pages = self.browser.pages().await.context("failed to list pages")?;
        if index >= pages.len() {
            return Err(anyhow!(
                "page index {index} out of range (0..{})",
                pages.len()
            ));
        }
        let page = pages.swap_remove(index);
        page.bring_to_front().await?;
        Ok(Session::new(ChromePage::new(page), self.config.clone()))
    }
}

/// One Chrome tab driven over the devtools protocol.
pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn click(&self, element: &Element, double: bool) -> Result<(), DriverError> {
        element.scroll_into_view().await.map_err(map_cdp)?;
        let point = element.clickable_point().await.map_err(map_cdp)?;

        self.mouse(DispatchMouseEventType::MouseMoved, point.x, point.y, None)
            .await?;
        let click_count = if double { 2 } else { 1 };
        self.mouse(
            DispatchMouseEventType::MousePressed,
            point.x,
            point.y,
            Some(click_count),
        )
        .await?;
        self.mouse(
            DispatchMouseEventType::MouseReleased,
            point.x,
            point.y,
            Some(click_count),
        )
        .await
    }

    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        click_count: Option<i64>,
    ) -> Result<(), DriverError> {
        let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
        if let Some(count) = click_count {
            builder = builder.button(MouseButton::Left).click_count(count);
        }
        let params = builder.build().map_err(DriverError::Protocol)?;
        self.page.execute(params).await.map_err(map_cdp)?;
        Ok(())
    }

    // "Control+A", "Shift+Tab", "Enter"
    async fn press_combo(&self, combo: &str) -> Result<(), DriverError> {
        let (modifiers, key) = parse_key_combo(combo);

        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .modifiers(modifiers)
                .build()
                .map_err(DriverError::Protocol)?;
            self.page.execute(params).await.map_err(map_cdp)?;
        }
        Ok(())
    }

    async fn select(&self, element: &Element, values: &[String]) -> Result<(), DriverError> {
        let wanted = serde_json::to_string(values).map_err(|e| DriverError::Script(e.to_string()))?;
        let declaration = format!(
            r"function() {{
                const wanted = {wanted};
                if (this.tagName !== 'SELECT') return false;
                const matches = (opt) =>
                    wanted.includes(opt.value) || wanted.includes(opt.label) || wanted.includes(opt.text.trim());
                if (this.multiple) {{
                    for (const opt of this.options) opt.selected = matches(opt);
                }} else {{
                    const hit = Array.from(this.options).find(matches);
                    if (hit) this.value = hit.value;
                }}
                this.dispatchEvent(new Event('input', {{ bubbles: true }}));
                this.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }}"
        );

        let returns = element
            .call_js_fn(declaration, false)
            .await
            .map_err(map_cdp)?;
        let was_select = returns.result.value.and_then(|v| v.as_bool()).unwrap_or(false);
        if !was_select {
            // custom listbox options and the like
            self.click(element, false).await?;
        }
        Ok(())
    }

    async fn clear(&self, element: &Element) -> Result<(), DriverError> {
        element
            .call_js_fn(
                r"function() {
                    if ('value' in this) {
                        this.value = '';
                    } else if (this.isContentEditable) {
                        this.textContent = '';
                    }
                    this.dispatchEvent(new Event('input', { bubbles: true }));
                    this.dispatchEvent(new Event('change', { bubbles: true }));
                }",
                false,
            )
            .await
            .map_err(map_cdp)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ChromePage {
    type Handle = Element;

    async fn navigate(&self, url: &str) -> Result<PageInfo, DriverError> {
        self.page.goto(url).await.map_err(map_cdp)?;
        let title = self.page.get_title().await.map_err(map_cdp)?;
        let url = self.page.url().await.map_err(map_cdp)?;
        Ok(PageInfo {
            title: title.unwrap_or_default(),
            url: url.unwrap_or_default(),
        })
    }

    async fn locate(&self, locator: &Locator) -> Result<Option<Element>, DriverError> {
        let mut found = self
            .page
            .find_elements(locator.as_css())
            .await
            .map_err(map_cdp)?;
        if found.is_empty() {
            return Ok(None);
        }
        Ok(Some(found.swap_remove(0)))
    }

    async fn interact(&self, element: &Element, interaction: &Interaction) -> Result<(), DriverError> {
        debug!(?interaction, "element interaction");
        match interaction {
            Interaction::Click { double } => self.click(element, *double).await,
            Interaction::Type { text, submit } => {
                self.click(element, false).await?;
                element.type_str(text).await.map_err(map_cdp)?;
                if *submit {
                    element.press_key("Enter").await.map_err(map_cdp)?;
                }
                Ok(())
            }
            Interaction::Select { values } => self.select(element, values).await,
            Interaction::Hover => {
                element.hover().await.map_err(map_cdp)?;
                Ok(())
            }
            Interaction::Scroll { .. } => {
                element.scroll_into_view().await.map_err(map_cdp)?;
                Ok(())
            }
            Interaction::PressKey { key } => {
                element.focus().await.map_err(map_cdp)?;
                self.press_combo(key).await
            }
            Interaction::Clear => self.clear(element).await,
        }
    }

    async fn interact_page(&self, interaction: &Interaction) -> Result<(), DriverError> {
        debug!(?interaction, "page interaction");
        match interaction {
            Interaction::PressKey { key } => self.press_combo(key).await,
            Interaction::Scroll { delta_y } => {
                self.page
                    .evaluate(format!("window.scrollBy(0, {delta_y})"))
                    .await
                    .map_err(map_cdp)?;
                Ok(())
            }
            other => Err(DriverError::Protocol(format!(
                "{other:?} needs a target element"
            ))),
        }
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await.map_err(map_cdp)?.unwrap_or_default())
    }

    async fn run_in_page(
        &self,
        script: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        let params = EvaluateParams::builder()
            .expression(format!("({script})({args})"))
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(DriverError::Script)?;

        self.page
            .evaluate_expression(params)
            .await
            .map_err(map_cdp)?
            .into_value()
            .map_err(|e| DriverError::Script(format!("unexpected script result: {e}")))
    }
}

fn map_cdp(err: CdpError) -> DriverError {
    let message = err.to_string();
    match err {
        CdpError::Timeout => DriverError::Timeout,
        CdpError::NotFound | CdpError::ScrollingFailed(_) => DriverError::Detached(message),
        CdpError::JavascriptException(_) => DriverError::Script(message),
        _ if DETACHED_MARKERS.iter().any(|m| message.contains(m)) => {
            DriverError::Detached(message)
        }
        _ => DriverError::Protocol(message),
    }
}

/// Split `Control+Shift+K` into the devtools modifier mask and the key name.
fn parse_key_combo(combo: &str) -> (i64, &str) {
    let mut parts: Vec<&str> = combo.split('+').collect();
    // a bare "+" or a trailing "+" names the plus key itself
    let key = match parts.pop() {
        Some("") | None => "+",
        Some(key) => key,
    };

    let mut mod_flags = 0;
    for m in parts.iter().filter(|m| !m.is_empty()) {
        match m.to_lowercase().as_str() {
            "control" | "ctrl" => mod_flags |= 2,
            "alt" | "option" => mod_flags |= 1,
            "shift" => mod_flags |= 8,
            "meta" | "cmd" | "command" => mod_flags |= 4,
            other => debug!(modifier = other, "ignoring unknown modifier"),
        }
    }
    (mod_flags, key)
}

async fn handler_loop(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if let Err(e) = event {
            debug!(error = %e, "devtools handler stopped");
            break;
        }
    }
}

// DevToolsActivePort in a known profile, else the conventional 9222 port
async fn try_find_existing_chrome() -> Option<String> {
    let home = dirs::home_dir()?;

    for profile in CHROME_PROFILES {
        let port_file = home.join(profile).join("DevToolsActivePort");
        if let Ok(content) = tokio::fs::read_to_string(&port_file).await {
            let mut lines = content.lines();
            if let (Some(port), Some(path)) = (lines.next(), lines.next()) {
                return Some(format!("ws://127.0.0.1:{}{}", port.trim(), path.trim()));
            }
        }
    }

    if reqwest::get("http://127.0.0.1:9222/json/version")
        .await
        .is_ok()
    {
        return Some("http://127.0.0.1:9222".to_string());
    }

    None
}

async fn launch_chrome_with_profile(config: &Config) -> Result<(Browser, Handler)> {
    // skip puppeteer's automation flags, they break ordinary browsing
    let mut builder = BrowserConfig::builder()
        .disable_default_args()
        .user_data_dir(&config.profile_dir)
        .viewport(None);
    if !config.headless {
        builder = builder.with_head();
    }
    let browser_config = builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

    Browser::launch(browser_config)
        .await
        .context("failed to launch chrome")
}

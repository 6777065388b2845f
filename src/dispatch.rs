//! Action dispatch: resolve a reference, run one interaction under a time
//! limit, then compare the page URL with the one seen before the action and
//! drop every reference when it changed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::driver::{BrowserDriver, Interaction};
use crate::error::{ActionError, DriverError};
use crate::refs::{Locator, RefTable};
use crate::snapshot;

const DEFAULT_WAIT_MS: u64 = 1_000;
const DEFAULT_SCROLL_DELTA: i64 = 600;

fn default_scroll_delta() -> i64 {
    DEFAULT_SCROLL_DELTA
}

/// An agent request. Element actions carry the reference from the latest
/// snapshot; `scroll` and `press_key` act on the page when it is omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click {
        reference: String,
        #[serde(default)]
        double: bool,
    },
    Type {
        reference: String,
        text: String,
        #[serde(default)]
        submit: bool,
    },
    Select {
        reference: String,
        values: Vec<String>,
    },
    Hover {
        reference: String,
    },
    Scroll {
        #[serde(default)]
        reference: Option<String>,
        #[serde(default = "default_scroll_delta")]
        delta_y: i64,
    },
    PressKey {
        #[serde(default)]
        reference: Option<String>,
        key: String,
    },
    Clear {
        reference: String,
    },
    /// Sleep for `millis`, or with `text` poll until the page shows it
    /// (`millis` then bounds the wait).
    Wait {
        #[serde(default)]
        millis: Option<u64>,
        #[serde(default)]
        text: Option<String>,
    },
}

impl Action {
    pub fn reference(&self) -> Option<&str> {
        match self {
            Action::Click { reference, .. }
            | Action::Type { reference, .. }
            | Action::Select { reference, .. }
            | Action::Hover { reference }
            | Action::Clear { reference } => Some(reference),
            Action::Scroll { reference, .. } | Action::PressKey { reference, .. } => {
                reference.as_deref()
            }
            Action::Wait { .. } => None,
        }
    }

    /// What the driver is asked to do; `None` for waits.
    pub fn interaction(&self) -> Option<Interaction> {
        let interaction = match self {
            Action::Click { double, .. } => Interaction::Click { double: *double },
            Action::Type { text, submit, .. } => Interaction::Type {
                text: text.clone(),
                submit: *submit,
            },
            Action::Select { values, .. } => Interaction::Select {
                values: values.clone(),
            },
            Action::Hover { .. } => Interaction::Hover,
            Action::Scroll { delta_y, .. } => Interaction::Scroll { delta_y: *delta_y },
            Action::PressKey { key, .. } => Interaction::PressKey { key: key.clone() },
            Action::Clear { .. } => Interaction::Clear,
            Action::Wait { .. } => return None,
        };
        Some(interaction)
    }

    fn time_limit(&self, config: &Config) -> Duration {
        match self {
            Action::Wait {
                millis: Some(ms),
                text: Some(_),
            } => Duration::from_millis(*ms),
            Action::Wait { millis, text: None } => {
                Duration::from_millis(millis.unwrap_or(DEFAULT_WAIT_MS)) + config.action_timeout
            }
            _ => config.action_timeout,
        }
    }

    fn cooldown(&self, config: &Config) -> Duration {
        match self {
            Action::Scroll { .. } => config.scroll_cooldown,
            Action::Select { .. } => config.select_cooldown,
            _ => Duration::ZERO,
        }
    }
}

/// Human-readable one-liner for logs and outcomes.
pub fn describe(action: &Action) -> String {
    match action {
        Action::Click {
            reference,
            double: false,
        } => format!("Clicking {reference}"),
        Action::Click {
            reference,
            double: true,
        } => format!("Double clicking {reference}"),
        Action::Type {
            reference, text, ..
        } => {
            let preview = if text.chars().count() > 30 {
                format!("{}...", text.chars().take(30).collect::<String>())
            } else {
                text.clone()
            };
            format!("Typing \"{preview}\" into {reference}")
        }
        Action::Select { reference, values } => {
            format!("Selecting {} in {reference}", values.join(", "))
        }
        Action::Hover { reference } => format!("Hovering {reference}"),
        Action::Scroll {
            reference: Some(reference),
            ..
        } => format!("Scrolling to {reference}"),
        Action::Scroll {
            reference: None,
            delta_y,
        } => {
            let dir = if *delta_y < 0 { "up" } else { "down" };
            format!("Scrolling page {dir}")
        }
        Action::PressKey {
            reference: Some(reference),
            key,
        } => format!("Pressing {key} on {reference}"),
        Action::PressKey {
            reference: None,
            key,
        } => format!("Pressing key: {key}"),
        Action::Clear { reference } => format!("Clearing {reference}"),
        Action::Wait {
            text: Some(text), ..
        } => format!("Waiting for \"{text}\""),
        Action::Wait { millis, text: None } => {
            format!("Waiting {}ms", millis.unwrap_or(DEFAULT_WAIT_MS))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchState {
    Idle,
    Resolving,
    NotFound,
    Executing,
    NavigationDetected,
    Invalidated,
    NoNavigation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub message: String,
    /// the page URL changed and every reference was dropped
    pub navigated: bool,
    pub url: String,
    /// states visited, starting and ending at `Idle`
    pub path: Vec<DispatchState>,
}

/// One action in flight. Borrowing the table mutably for the whole run keeps a
/// session to a single action at a time.
pub struct Dispatcher<'a, D: BrowserDriver + ?Sized> {
    driver: &'a D,
    table: &'a mut RefTable,
    config: &'a Config,
    path: Vec<DispatchState>,
}

impl<'a, D: BrowserDriver + ?Sized> Dispatcher<'a, D> {
    pub fn new(driver: &'a D, table: &'a mut RefTable, config: &'a Config) -> Self {
        Self {
            driver,
            table,
            config,
            path: vec![DispatchState::Idle],
        }
    }

    fn enter(&mut self, state: DispatchState) {
        if let Some(from) = self.path.last() {
            debug!(from = ?from, to = ?state, "dispatch transition");
        }
        self.path.push(state);
    }

    pub async fn run(mut self, action: &Action) -> Result<ActionOutcome, ActionError> {
        let description = describe(action);
        info!(action = %description, epoch = self.table.epoch(), "dispatching");

        let before = self.driver.current_url().await?;

        let target = match action.reference() {
            Some(reference) => {
                self.enter(DispatchState::Resolving);
                match self.table.resolve(reference) {
                    Some(locator) => Some((reference.to_string(), locator.clone())),
                    None => {
                        self.enter(DispatchState::NotFound);
                        debug!(reference, epoch = self.table.epoch(), "reference not in table");
                        return Err(ActionError::ReferenceNotFound {
                            reference: reference.to_string(),
                        });
                    }
                }
            }
            None => None,
        };

        self.enter(DispatchState::Executing);
        let limit = action.time_limit(self.config);
        let executed = match timeout(limit, self.execute(action, target.as_ref())).await {
            Ok(result) => result,
            Err(_) => {
                warn!(action = %description, after_ms = limit.as_millis(), "action timed out");
                Err(ActionError::Timeout {
                    action: description.clone(),
                    after: limit,
                })
            }
        };
        if let Err(err) = executed {
            // the page may have moved before the failure surfaced
            self.invalidate_if_moved(&before).await;
            return Err(err);
        }

        let cooldown = action.cooldown(self.config);
        if !cooldown.is_zero() {
            sleep(cooldown).await;
        }

        let after = self.driver.current_url().await?;
        let navigated = after != before;
        if navigated {
            self.enter(DispatchState::NavigationDetected);
            info!(from = %before, to = %after, "navigation detected");
            self.table.invalidate();
            self.enter(DispatchState::Invalidated);
            if !self.config.navigation_cooldown.is_zero() {
                sleep(self.config.navigation_cooldown).await;
            }
        } else {
            self.enter(DispatchState::NoNavigation);
        }
        self.enter(DispatchState::Idle);

        let message = if navigated {
            format!("{description}: done. Page navigated to {after}; take a new snapshot.")
        } else {
            format!("{description}: done.")
        };

        Ok(ActionOutcome {
            message,
            navigated,
            url: after,
            path: self.path,
        })
    }

    async fn invalidate_if_moved(&mut self, before: &str) {
        match self.driver.current_url().await {
            Ok(after) if after == before => {}
            Ok(after) => {
                self.enter(DispatchState::NavigationDetected);
                info!(from = %before, to = %after, "navigation detected after failed action");
                self.table.invalidate();
                self.enter(DispatchState::Invalidated);
            }
            Err(e) => {
                warn!(error = %e, "page url unreadable after failed action, dropping references");
                self.table.invalidate();
                self.enter(DispatchState::Invalidated);
            }
        }
    }

    async fn execute(
        &self,
        action: &Action,
        target: Option<&(String, Locator)>,
    ) -> Result<(), ActionError> {
        if let Action::Wait { millis, text } = action {
            return match text {
                Some(text) => self.poll_for_text(text).await,
                None => {
                    sleep(Duration::from_millis(millis.unwrap_or(DEFAULT_WAIT_MS))).await;
                    Ok(())
                }
            };
        }
        let Some(interaction) = action.interaction() else {
            return Ok(());
        };

        match target {
            Some((reference, locator)) => {
                let handle = self
                    .driver
                    .locate(locator)
                    .await
                    .map_err(|e| unreachable(reference, e))?
                    .ok_or_else(|| ActionError::ElementUnreachable {
                        reference: reference.clone(),
                        reason: "no element matches its locator".to_string(),
                    })?;
                self.driver
                    .interact(&handle, &interaction)
                    .await
                    .map_err(|e| unreachable(reference, e))
            }
            None => Ok(self.driver.interact_page(&interaction).await?),
        }
    }

    // scratch table so the references handed out earlier stay valid
    async fn poll_for_text(&self, text: &str) -> Result<(), ActionError> {
        loop {
            let page = snapshot::capture(self.driver).await?;
            let mut scratch = RefTable::new(self.table.scope());
            if snapshot::generate(&page, &mut scratch).contains_text(text) {
                return Ok(());
            }
            sleep(self.config.wait_poll).await;
        }
    }
}

fn unreachable(reference: &str, err: DriverError) -> ActionError {
    match err {
        DriverError::Detached(reason) => ActionError::ElementUnreachable {
            reference: reference.to_string(),
            reason,
        },
        other => ActionError::Driver(other),
    }
}

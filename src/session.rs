use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::{Action, ActionOutcome, Dispatcher};
use crate::dom::CapturedPage;
use crate::driver::{BrowserDriver, PageInfo};
use crate::error::ActionError;
use crate::refs::{Locator, RefTable};
use crate::snapshot::{self, Snapshot};

struct CachedSnapshot {
    /// the capture `snapshot` was generated from
    page: CapturedPage,
    snapshot: Snapshot,
    /// an action ran since this was generated
    stale: bool,
}

/// One agent's view of one page: the reference table, its navigation epoch and
/// the last snapshot. Every operation takes `&mut self`, so a session runs one
/// operation at a time.
pub struct Session<D: BrowserDriver> {
    id: Uuid,
    driver: D,
    config: Config,
    table: RefTable,
    cache: Option<CachedSnapshot>,
}

impl<D: BrowserDriver> Session<D> {
    pub fn new(driver: D, config: Config) -> Self {
        let table = RefTable::new(config.ref_scope);
        Self {
            id: Uuid::new_v4(),
            driver,
            config,
            table,
            cache: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn epoch(&self) -> u64 {
        self.table.epoch()
    }

    pub fn references(&self) -> &RefTable {
        &self.table
    }

    pub async fn navigate(&mut self, url: &str) -> Result<PageInfo, ActionError> {
        info!(session = %self.id, url, "navigating");
        let before = self.driver.current_url().await.ok();
        let info = match self.driver.navigate(url).await {
            Ok(info) => info,
            Err(err) => {
                // a load can commit before the driver reports the failure
                let after = self.driver.current_url().await.ok();
                if before.is_none() || after.is_none() || before != after {
                    warn!(session = %self.id, error = %err, "navigation failed after the page moved");
                    self.invalidate();
                }
                return Err(err.into());
            }
        };
        self.invalidate();
        if !self.config.navigation_cooldown.is_zero() {
            sleep(self.config.navigation_cooldown).await;
        }
        Ok(info)
    }

    /// Capture the page and issue a fresh set of references. Previous
    /// references of this epoch stop resolving.
    pub async fn generate_snapshot(&mut self) -> Result<Snapshot, ActionError> {
        let page = snapshot::capture(&self.driver).await?;
        Ok(self.publish(page))
    }

    /// The page as it is now. The document is always captured; when it matches
    /// the capture behind the last snapshot and no action ran since, that
    /// snapshot and its references are returned unchanged. Otherwise new
    /// references are issued, and a changed URL also starts a new epoch.
    pub async fn current_snapshot(&mut self) -> Result<Snapshot, ActionError> {
        let page = snapshot::capture(&self.driver).await?;
        if let Some(cached) = self.cache.as_ref().filter(|c| !c.stale) {
            if page.url != cached.page.url {
                debug!(from = %cached.page.url, to = %page.url, "page moved since last snapshot");
                self.invalidate();
            } else if page == cached.page {
                return Ok(cached.snapshot.clone());
            } else {
                debug!(url = %page.url, "document changed since last snapshot");
            }
        }
        Ok(self.publish(page))
    }

    fn publish(&mut self, page: CapturedPage) -> Snapshot {
        let snapshot = snapshot::generate(&page, &mut self.table);
        info!(
            session = %self.id,
            url = %snapshot.url,
            references = snapshot.reference_count,
            generation = self.table.generation(),
            "snapshot ready"
        );
        self.cache = Some(CachedSnapshot {
            page,
            snapshot: snapshot.clone(),
            stale: false,
        });
        snapshot
    }

    pub fn resolve(&self, reference: &str) -> Result<Locator, ActionError> {
        self.table
            .resolve(reference)
            .cloned()
            .ok_or_else(|| ActionError::ReferenceNotFound {
                reference: reference.to_string(),
            })
    }

    /// Drop every reference and the cached page data.
    pub fn invalidate(&mut self) {
        self.table.invalidate();
        self.cache = None;
    }

    pub async fn dispatch(&mut self, action: &Action) -> Result<ActionOutcome, ActionError> {
        let epoch = self.table.epoch();
        let result = Dispatcher::new(&self.driver, &mut self.table, &self.config)
            .run(action)
            .await;

        // failed actions can navigate too
        if self.table.epoch() != epoch {
            self.cache = None;
        } else if !matches!(result, Err(ActionError::ReferenceNotFound { .. })) {
            self.mark_stale();
        }
        result
    }

    /// Poll until `text` shows up in the page, then return the snapshot that has it.
    pub async fn wait_for_text(
        &mut self,
        text: &str,
        timeout: Duration,
    ) -> Result<Snapshot, ActionError> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.dispatch(&Action::Wait {
            millis: Some(millis),
            text: Some(text.to_string()),
        })
        .await?;
        self.generate_snapshot().await
    }

    fn mark_stale(&mut self) {
        if let Some(cached) = self.cache.as_mut() {
            cached.stale = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{self, FakeDriver};
    use serde_json::json;

    const SIGNUP: &str = "https://example.com/signup";
    const WELCOME: &str = "https://example.com/welcome";

    fn quick_config() -> Config {
        Config {
            action_timeout: Duration::from_millis(200),
            navigation_cooldown: Duration::ZERO,
            scroll_cooldown: Duration::ZERO,
            select_cooldown: Duration::ZERO,
            wait_poll: Duration::from_millis(10),
            ..Config::default()
        }
    }

    fn signup_session() -> Session<FakeDriver> {
        let signup = fake::page(
            "Sign up",
            SIGNUP,
            &json!([{
                "tag": "form",
                "children": [
                    { "tag": "input", "attrs": { "name": "website" }, "hidden": true },
                    { "tag": "input", "attrs": { "name": "email", "placeholder": "Email" } },
                    { "tag": "button", "attrs": { "type": "submit" }, "children": ["Sign up"] }
                ]
            }]),
        );
        let welcome = fake::page(
            "Welcome",
            WELCOME,
            &json!([
                { "tag": "h1", "children": ["Welcome aboard"] },
                { "tag": "a", "attrs": { "href": "/settings" }, "children": ["Settings"] }
            ]),
        );
        let submit = Locator::root("body").child(1).child(3);
        let driver = FakeDriver::new()
            .with_page(signup)
            .with_page(welcome)
            .navigates_on(SIGNUP, &submit, WELCOME);
        Session::new(driver, quick_config())
    }

    #[tokio::test]
    async fn test_honeypot_signup_flow() {
        let mut session = signup_session();

        let first = session.generate_snapshot().await.unwrap();
        assert_eq!(first.reference_count, 3);
        assert!(!first.text.contains("website"));
        assert_eq!(
            session.resolve("s1e3").unwrap().as_css(),
            "body > :nth-child(1) > :nth-child(3)"
        );

        let typed = session
            .dispatch(&Action::Type {
                reference: "s1e2".to_string(),
                text: "me@example.com".to_string(),
                submit: false,
            })
            .await
            .unwrap();
        assert!(!typed.navigated);
        assert_eq!(session.epoch(), 0);

        let clicked = session
            .dispatch(&Action::Click {
                reference: "s1e3".to_string(),
                double: false,
            })
            .await
            .unwrap();
        assert!(clicked.navigated);
        assert_eq!(session.epoch(), 1);

        // old references die with the epoch
        let err = session
            .dispatch(&Action::Click {
                reference: "s1e2".to_string(),
                double: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ReferenceNotFound { .. }));
        assert!(session.resolve("s1e1").is_err());

        let next = session.current_snapshot().await.unwrap();
        assert!(next.text.contains("- Page Title: Welcome"));
        assert!(next.text.contains("- document [ref=s1e1]:"));
        assert!(next.text.contains("- link \"Settings\" [ref=s1e2]:"));
        assert_eq!(next.url, WELCOME);
    }

    #[tokio::test]
    async fn test_current_snapshot_reuses_fresh_capture() {
        let mut session = signup_session();

        let first = session.current_snapshot().await.unwrap();
        let again = session.current_snapshot().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(session.driver().state().captures, 2);
        assert_eq!(session.references().generation(), 1);

        session
            .dispatch(&Action::Hover {
                reference: "s1e2".to_string(),
            })
            .await
            .unwrap();
        session.current_snapshot().await.unwrap();
        assert_eq!(session.driver().state().captures, 3);
        assert_eq!(session.references().generation(), 2);
    }

    #[tokio::test]
    async fn test_current_snapshot_sees_in_place_update() {
        let mut session = signup_session();
        let first = session.current_snapshot().await.unwrap();
        assert!(!first.text.contains("Email taken"));

        // same url, new content, and no action in between
        let updated = fake::page(
            "Sign up",
            SIGNUP,
            &json!([
                { "tag": "p", "children": ["Email taken"] },
                {
                    "tag": "form",
                    "children": [
                        { "tag": "input", "attrs": { "name": "email", "placeholder": "Email" } },
                        { "tag": "button", "attrs": { "type": "submit" }, "children": ["Sign up"] }
                    ]
                }
            ]),
        );
        session
            .driver()
            .state()
            .pages
            .insert(SIGNUP.to_string(), updated);

        let second = session.current_snapshot().await.unwrap();
        assert!(second.text.contains("Email taken"));
        assert_eq!(session.epoch(), 0);
        assert_eq!(session.references().generation(), 2);
        assert_eq!(
            session.resolve("s1e2").unwrap().as_css(),
            "body > :nth-child(2) > :nth-child(1)"
        );
    }

    #[tokio::test]
    async fn test_failed_submit_after_navigation_drops_references() {
        let mut session = signup_session();
        session.current_snapshot().await.unwrap();
        session.driver().state().fail_after = Some(crate::error::DriverError::Detached(
            "Cannot find context with specified id".to_string(),
        ));

        let err = session
            .dispatch(&Action::Click {
                reference: "s1e3".to_string(),
                double: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ElementUnreachable { .. }));
        assert_eq!(session.epoch(), 1);
        assert!(matches!(
            session.resolve("s1e2"),
            Err(ActionError::ReferenceNotFound { .. })
        ));

        let next = session.current_snapshot().await.unwrap();
        assert_eq!(next.url, WELCOME);
        assert!(next.text.contains("- link \"Settings\" [ref=s1e2]:"));
    }

    #[tokio::test]
    async fn test_regeneration_restarts_sequence() {
        let mut session = signup_session();
        session.generate_snapshot().await.unwrap();
        let before = session.resolve("s1e2").unwrap();

        let again = session.generate_snapshot().await.unwrap();
        assert_eq!(again.reference_count, 3);
        assert_eq!(session.resolve("s1e2").unwrap(), before);
        assert!(session.resolve("s1e4").is_err());
        assert_eq!(session.epoch(), 0);
    }

    #[tokio::test]
    async fn test_navigate_invalidates() {
        let mut session = signup_session();
        session.generate_snapshot().await.unwrap();

        let info = session.navigate(WELCOME).await.unwrap();
        assert_eq!(info.title, "Welcome");
        assert_eq!(session.epoch(), 1);
        assert!(session.references().is_empty());

        let err = session.resolve("s1e2").unwrap_err();
        assert!(err.to_string().contains("take a new snapshot"));
    }

    #[tokio::test]
    async fn test_navigate_to_unknown_host_fails() {
        let mut session = signup_session();
        session.generate_snapshot().await.unwrap();
        let err = session.navigate("https://nowhere.invalid/").await.unwrap_err();
        assert!(matches!(err, ActionError::Driver(_)));
        assert!(!err.is_recoverable());
        // still on the signup page, references intact
        assert_eq!(session.epoch(), 0);
        assert!(session.resolve("s1e2").is_ok());
    }

    #[tokio::test]
    async fn test_navigation_committed_before_error_invalidates() {
        let mut session = signup_session();
        session.generate_snapshot().await.unwrap();
        session.driver().state().fail_after = Some(crate::error::DriverError::Timeout);

        let err = session.navigate(WELCOME).await.unwrap_err();
        assert!(matches!(err, ActionError::Driver(crate::error::DriverError::Timeout)));
        assert_eq!(session.epoch(), 1);
        assert!(session.resolve("s1e2").is_err());
        assert_eq!(session.current_snapshot().await.unwrap().title, "Welcome");
    }

    #[tokio::test]
    async fn test_outside_navigation_detected_by_current_snapshot() {
        let mut session = signup_session();
        session.current_snapshot().await.unwrap();

        session.driver().state().current = WELCOME.to_string();
        let snapshot = session.current_snapshot().await.unwrap();
        assert_eq!(snapshot.title, "Welcome");
        assert_eq!(session.epoch(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_text_returns_matching_snapshot() {
        let mut session = signup_session();
        let snapshot = session
            .wait_for_text("Sign up", Duration::from_millis(300))
            .await
            .unwrap();
        assert!(snapshot.text.contains("button \"Sign up\""));

        let err = session
            .wait_for_text("Dashboard", Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Timeout { .. }));
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = Session::new(FakeDriver::new(), Config::default());
        let b = Session::new(FakeDriver::new(), Config::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.config().ref_scope, 1);
    }
}

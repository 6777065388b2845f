// runtime settings, read from the process environment (.env supported)

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_NAV_COOLDOWN_MS: u64 = 1_000;
const DEFAULT_SCROLL_COOLDOWN_MS: u64 = 300;
const DEFAULT_SELECT_COOLDOWN_MS: u64 = 300;
const DEFAULT_WAIT_POLL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct Config {
    /// devtools websocket to attach to instead of discovering one
    pub ws_url: Option<String>,
    pub headless: bool,
    pub profile_dir: PathBuf,
    pub action_timeout: Duration,
    pub navigation_cooldown: Duration,
    pub scroll_cooldown: Duration,
    pub select_cooldown: Duration,
    pub wait_poll: Duration,
    /// the `N` in `sNeM` reference tokens
    pub ref_scope: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: None,
            headless: false,
            profile_dir: default_profile_dir(),
            action_timeout: Duration::from_millis(DEFAULT_ACTION_TIMEOUT_MS),
            navigation_cooldown: Duration::from_millis(DEFAULT_NAV_COOLDOWN_MS),
            scroll_cooldown: Duration::from_millis(DEFAULT_SCROLL_COOLDOWN_MS),
            select_cooldown: Duration::from_millis(DEFAULT_SELECT_COOLDOWN_MS),
            wait_poll: Duration::from_millis(DEFAULT_WAIT_POLL_MS),
            ref_scope: 1,
        }
    }
}

impl Config {
    /// Load `.env` (cwd, then parent) and read `PAGEHAND_*` variables over the defaults.
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("PAGEHAND_WS_URL").filter(|u| !u.trim().is_empty()) {
            config.ws_url = Some(url.trim().to_string());
        }
        if let Some(raw) = lookup("PAGEHAND_HEADLESS") {
            match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.headless = true,
                "0" | "false" | "no" | "off" => config.headless = false,
                other => warn!(value = other, "ignoring invalid PAGEHAND_HEADLESS"),
            }
        }
        if let Some(dir) = lookup("PAGEHAND_PROFILE_DIR").filter(|d| !d.trim().is_empty()) {
            config.profile_dir = PathBuf::from(dir.trim());
        }

        read_millis(&lookup, "PAGEHAND_ACTION_TIMEOUT_MS", &mut config.action_timeout);
        read_millis(&lookup, "PAGEHAND_NAV_COOLDOWN_MS", &mut config.navigation_cooldown);
        read_millis(&lookup, "PAGEHAND_SCROLL_COOLDOWN_MS", &mut config.scroll_cooldown);
        read_millis(&lookup, "PAGEHAND_SELECT_COOLDOWN_MS", &mut config.select_cooldown);
        read_millis(&lookup, "PAGEHAND_WAIT_POLL_MS", &mut config.wait_poll);

        if let Some(raw) = lookup("PAGEHAND_REF_SCOPE") {
            match raw.trim().parse::<u32>() {
                Ok(scope) if scope > 0 => config.ref_scope = scope,
                _ => warn!(value = %raw, "ignoring invalid PAGEHAND_REF_SCOPE"),
            }
        }

        config
    }
}

fn read_millis<F>(lookup: &F, key: &str, slot: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<u64>() {
        Ok(ms) => *slot = Duration::from_millis(ms),
        Err(e) => warn!(key, value = %raw, error = %e, "ignoring invalid duration"),
    }
}

// chrome refuses remote debugging on its default profile, so use a dedicated one
fn default_profile_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pagehand-chrome")
}

//! Semantic page snapshots for browser-driving agents.
//!
//! A [`session::Session`] turns the live document into an indented outline
//! where every actionable element carries a short reference (`s1e4`). The
//! agent acts by reference; the session maps it back to a structural locator,
//! runs the interaction and drops every reference when the page navigates.

pub mod browser;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod dom;
pub mod driver;
pub mod error;
pub mod refs;
pub mod session;
pub mod snapshot;

#[cfg(test)]
mod fake;

pub use config::Config;
pub use dispatch::{Action, ActionOutcome};
pub use driver::{BrowserDriver, Interaction, PageInfo};
pub use error::{ActionError, DriverError};
pub use session::Session;
pub use snapshot::Snapshot;

use std::time::Duration;
use thiserror::Error;

/// Failures reported by the browser driver collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// the element behind a handle left the document or lost its layout
    #[error("Element detached: {0}")]
    Detached(String),
    #[error("Script error: {0}")]
    Script(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Driver timed out")]
    Timeout,
}

/// Failures surfaced to the agent by the action layer.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Reference {reference} not found. The page hierarchy has changed; take a new snapshot (or navigate) and use the fresh references.")]
    ReferenceNotFound { reference: String },
    #[error("Element {reference} is unreachable ({reason}). The hierarchy may be stale; take a new snapshot.")]
    ElementUnreachable { reference: String, reason: String },
    #[error("Browser error: {0}")]
    Driver(#[from] DriverError),
    #[error("{action} timed out after {}ms. References may be stale; take a new snapshot.", .after.as_millis())]
    Timeout { action: String, after: Duration },
    #[error("Snapshot capture failed: {0}")]
    Capture(String),
}

impl ActionError {
    /// Reference misses, unreachable elements and timeouts are fixed by a fresh snapshot.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ActionError::ReferenceNotFound { .. }
                | ActionError::ElementUnreachable { .. }
                | ActionError::Timeout { .. }
        )
    }

    pub fn hint(&self) -> &'static str {
        if self.is_recoverable() {
            "take a new snapshot before acting again"
        } else {
            "the browser session may need to be restarted"
        }
    }
}

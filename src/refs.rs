//! Reference table: short tokens handed to the agent, mapped to locators the
//! agent never sees.
//!
//! Tokens look like `s1e7` (`s<scope>e<sequence>`). The sequence restarts at 1
//! on every snapshot generation and the whole table is dropped when the page
//! navigates, so a token is only meaningful for the snapshot that issued it.

use std::fmt;

use tracing::debug;

/// Opaque element reference as shown in the outline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference(String);

impl Reference {
    fn new(scope: u32, sequence: usize) -> Self {
        Self(format!("s{scope}e{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural CSS path from the document body, e.g.
/// `body > :nth-child(2) > :nth-child(1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(String);

const STEP_PREFIX: &str = " > :nth-child(";

impl Locator {
    pub fn root(tag: &str) -> Self {
        Self(tag.to_string())
    }

    /// Locator of the `nth` (1-based) element child.
    pub fn child(&self, nth: usize) -> Self {
        Self(format!("{}{STEP_PREFIX}{nth})", self.0))
    }

    pub fn as_css(&self) -> &str {
        &self.0
    }

    /// Element-child positions below the root, or `None` if this locator was
    /// not built by [`Locator::child`].
    pub fn steps(&self) -> Option<Vec<usize>> {
        let mut parts = self.0.split(STEP_PREFIX);
        let root = parts.next()?;
        if root.is_empty() || root.contains(' ') {
            return None;
        }
        parts
            .map(|part| part.strip_suffix(')')?.parse::<usize>().ok())
            .collect()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct RefTable {
    scope: u32,
    /// navigation epoch these entries belong to
    epoch: u64,
    /// snapshot generations since the table was created
    generation: u64,
    // entry i holds sequence i + 1
    entries: Vec<Locator>,
}

impl RefTable {
    pub fn new(scope: u32) -> Self {
        Self {
            scope,
            epoch: 0,
            generation: 0,
            entries: Vec::new(),
        }
    }

    pub fn scope(&self) -> u32 {
        self.scope
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start a new snapshot generation: empty table, sequence back to 1.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }

    /// Drop every reference and move to the next navigation epoch.
    pub fn invalidate(&mut self) {
        debug!(
            epoch = self.epoch,
            dropped = self.entries.len(),
            "reference table invalidated"
        );
        self.entries.clear();
        self.epoch += 1;
    }

    pub fn allocate(&mut self, locator: Locator) -> Reference {
        self.entries.push(locator);
        Reference::new(self.scope, self.entries.len())
    }

    pub fn resolve(&self, reference: &str) -> Option<&Locator> {
        let sequence = self.parse(reference)?;
        self.entries.get(sequence.checked_sub(1)?)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.resolve(reference).is_some()
    }

    /// Current allocation mark, for [`RefTable::rollback`].
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// Forget references allocated after `mark`.
    pub fn rollback(&mut self, mark: usize) {
        self.entries.truncate(mark);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Reference, &Locator)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, locator)| (Reference::new(self.scope, i + 1), locator))
    }

    // only the exact spelling this table issues resolves (no `+`, no leading zeros)
    fn parse(&self, reference: &str) -> Option<usize> {
        let reference = reference.trim();
        let (_, sequence) = reference.strip_prefix('s')?.split_once('e')?;
        let sequence: usize = sequence.parse().ok()?;
        (Reference::new(self.scope, sequence).as_str() == reference).then_some(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Locator {
        Locator::root("body")
    }

    #[test]
    fn test_allocation_is_sequential() {
        let mut table = RefTable::new(1);
        let a = table.allocate(body().child(1));
        let b = table.allocate(body().child(2));
        assert_eq!(a.as_str(), "s1e1");
        assert_eq!(b.as_str(), "s1e2");
        assert_eq!(table.resolve("s1e2"), Some(&body().child(2)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unknown_and_malformed_references_miss() {
        let mut table = RefTable::new(1);
        table.allocate(body());
        assert!(table.resolve("s1e0").is_none());
        assert!(table.resolve("s1e2").is_none());
        assert!(table.resolve("s2e1").is_none());
        assert!(table.resolve("e1").is_none());
        assert!(table.resolve("button").is_none());
        assert!(table.contains(" s1e1 "));
    }

    #[test]
    fn test_only_exact_spelling_resolves() {
        let mut table = RefTable::new(1);
        table.allocate(body());
        table.allocate(body().child(1));

        for spelled in ["s1e+2", "s1e02", "s01e2", "s+1e2", "s1e2x", "S1e2", "s1e 2"] {
            assert!(table.resolve(spelled).is_none(), "{spelled} resolved");
        }
        assert_eq!(table.resolve("s1e2"), Some(&body().child(1)));
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut table = RefTable::new(1);
        table.allocate(body().child(1));
        table.allocate(body().child(2));
        table.reset();
        assert!(table.is_empty());
        assert!(table.resolve("s1e2").is_none());
        assert_eq!(table.allocate(body().child(5)).as_str(), "s1e1");
        assert_eq!(table.generation(), 1);
        assert_eq!(table.epoch(), 0);
    }

    #[test]
    fn test_invalidate_moves_epoch() {
        let mut table = RefTable::new(1);
        table.allocate(body());
        table.invalidate();
        assert_eq!(table.epoch(), 1);
        assert!(table.resolve("s1e1").is_none());
    }

    #[test]
    fn test_rollback_keeps_sequence_gap_free() {
        let mut table = RefTable::new(1);
        table.allocate(body().child(1));
        let mark = table.checkpoint();
        table.allocate(body().child(2));
        table.allocate(body().child(3));
        table.rollback(mark);
        assert_eq!(table.allocate(body().child(4)).as_str(), "s1e2");
        assert_eq!(table.resolve("s1e2"), Some(&body().child(4)));
    }

    #[test]
    fn test_custom_scope() {
        let mut table = RefTable::new(3);
        assert_eq!(table.allocate(body()).as_str(), "s3e1");
        assert!(table.resolve("s1e1").is_none());
        assert!(table.resolve("s3e1").is_some());
    }

    #[test]
    fn test_locator_steps_round_trip() {
        let locator = body().child(2).child(10);
        assert_eq!(locator.as_css(), "body > :nth-child(2) > :nth-child(10)");
        assert_eq!(locator.steps(), Some(vec![2, 10]));
        assert_eq!(body().steps(), Some(vec![]));
        assert_eq!(Locator("div.main > a".to_string()).steps(), None);
    }
}

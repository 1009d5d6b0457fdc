//! Roster invariants.
//!
//! A roster invariant is a statement about what the keyring shows that holds
//! after every event, whatever came before it: sections are sorted, busy
//! locks stay pinned, no lock is shown twice. Property tests and runtime
//! tests evaluate them after each step instead of asserting on hand-picked
//! scenarios.
//!
//! Checks never look at a [`keyring_app::Keyring`] directly. They read a
//! [`KeyringSnapshot`], built either from the state machine (which also
//! exposes the roster entries) or from a view published by the runtime.
//!
//! ```ignore
//! let snapshot = KeyringSnapshot::from_keyring(&keyring);
//! InvariantRegistry::standard().assert_all(&snapshot, "after tick");
//! ```

mod checks;
mod snapshot;

use thiserror::Error;

pub use checks::{
    BusyLocksPinnedNearby, ErrorMessageOnlyWhenFailed, PlaceholderOnlyWhenNearbyEmpty,
    SectionsSortedByTitle, SingleCommandPerLock, UniqueLockIds, ViewMatchesEntries,
};
pub use snapshot::{EntrySnapshot, KeyringSnapshot, LockRow, RowSnapshot};

/// Outcome of a single check.
pub type InvariantResult = Result<(), Violation>;

/// A failed check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{invariant}: {message}")]
pub struct Violation {
    /// Check that failed.
    pub invariant: &'static str,
    /// Offending lock or section.
    pub message: String,
}

/// Property of the displayed roster.
pub trait Invariant: Send + Sync {
    /// Stable name, used in violation reports.
    fn name(&self) -> &'static str;

    /// Evaluate against `state`.
    fn check(&self, state: &KeyringSnapshot) -> InvariantResult;
}

/// Ordered set of checks evaluated together.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every roster check this crate defines.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SectionsSortedByTitle);
        registry.add(PlaceholderOnlyWhenNearbyEmpty);
        registry.add(BusyLocksPinnedNearby);
        registry.add(UniqueLockIds);
        registry.add(ViewMatchesEntries);
        registry.add(ErrorMessageOnlyWhenFailed);
        registry.add(SingleCommandPerLock);
        registry
    }

    /// Register `check` after the existing ones.
    pub fn add(&mut self, check: impl Invariant + 'static) {
        self.checks.push(Box::new(check));
    }

    /// Names of the registered checks, in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.checks.iter().map(|check| check.name())
    }

    /// Run every check. Collects all violations rather than stopping at the
    /// first.
    pub fn check_all(&self, state: &KeyringSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> =
            self.checks.iter().filter_map(|check| check.check(state).err()).collect();
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Run every check and panic with all violations and `context`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &KeyringSnapshot, context: &str) {
        let Err(violations) = self.check_all(state) else {
            return;
        };
        let report: Vec<String> = violations.iter().map(Violation::to_string).collect();
        panic!("roster invariants violated {context}:\n  {}", report.join("\n  "));
    }

    /// Registered checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_runs_each_check_once() {
        let registry = InvariantRegistry::standard();
        let names: Vec<_> = registry.names().collect();

        assert_eq!(registry.len(), 7);
        let mut unique = names.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn empty_roster_satisfies_standard_checks() {
        assert_eq!(InvariantRegistry::standard().check_all(&KeyringSnapshot::empty()), Ok(()));
    }

    #[test]
    fn violations_are_collected_from_every_check() {
        let snapshot = KeyringSnapshot::empty()
            .with_max_in_flight([("a".to_string(), 3), ("b".to_string(), 2)].into());
        let mut registry = InvariantRegistry::new();
        registry.add(SingleCommandPerLock);
        registry.add(SingleCommandPerLock);

        let violations = registry.check_all(&snapshot).unwrap_err();

        assert_eq!(violations.len(), 2);
        assert!(violations[0].to_string().starts_with("single_command_per_lock: "));
    }
}

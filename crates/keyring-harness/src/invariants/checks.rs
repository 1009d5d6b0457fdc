//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use keyring_core::LockState;

use super::{Invariant, InvariantResult, KeyringSnapshot, RowSnapshot, Violation};

/// Each section is sorted by title, case-sensitively.
pub struct SectionsSortedByTitle;

impl Invariant for SectionsSortedByTitle {
    fn name(&self) -> &'static str {
        "sections_sorted_by_title"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        for (section, rows) in [("nearby", &state.nearby), ("other", &state.other)] {
            let titles: Vec<&str> =
                rows.iter().filter_map(RowSnapshot::lock).map(|r| r.title.as_str()).collect();
            if let Some(pair) = titles.windows(2).find(|pair| pair[0] > pair[1]) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{section}: {:?} sorted before {:?}", pair[0], pair[1]),
                });
            }
        }
        Ok(())
    }
}

/// The placeholder is the only row of an otherwise empty nearby section, and
/// never appears in the other section.
pub struct PlaceholderOnlyWhenNearbyEmpty;

impl Invariant for PlaceholderOnlyWhenNearbyEmpty {
    fn name(&self) -> &'static str {
        "placeholder_only_when_nearby_empty"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        if state.visible_sections == 0 {
            return Ok(());
        }

        let placeholders = state.nearby.iter().filter(|row| **row == RowSnapshot::Placeholder).count();
        let locks = state.nearby.len() - placeholders;
        let expected = usize::from(locks == 0);
        if placeholders != expected {
            return Err(Violation {
                invariant: self.name(),
                message: format!("nearby has {locks} locks and {placeholders} placeholders"),
            });
        }

        if state.other.contains(&RowSnapshot::Placeholder) {
            return Err(Violation {
                invariant: self.name(),
                message: "placeholder in other section".to_string(),
            });
        }
        Ok(())
    }
}

/// A lock is in the nearby section exactly when it is in range or its command
/// state is not idle.
pub struct BusyLocksPinnedNearby;

impl Invariant for BusyLocksPinnedNearby {
    fn name(&self) -> &'static str {
        "busy_locks_pinned_nearby"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        for row in state.nearby.iter().filter_map(RowSnapshot::lock) {
            if !row.nearby && row.state == LockState::Idle {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("idle out-of-range lock {} in nearby", row.physical_lock_id),
                });
            }
        }
        for row in state.other.iter().filter_map(RowSnapshot::lock) {
            if row.nearby || row.state != LockState::Idle {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "lock {} (nearby: {}, state: {:?}) in other",
                        row.physical_lock_id, row.nearby, row.state
                    ),
                });
            }
        }
        Ok(())
    }
}

/// No lock id is displayed twice.
pub struct UniqueLockIds;

impl Invariant for UniqueLockIds {
    fn name(&self) -> &'static str {
        "unique_lock_ids"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        for row in state.lock_rows() {
            if !seen.insert(row.physical_lock_id.as_str()) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("lock {} displayed twice", row.physical_lock_id),
                });
            }
        }
        Ok(())
    }
}

/// Every roster entry is displayed, and only roster entries are displayed.
///
/// Skipped for snapshots taken from a published view alone.
pub struct ViewMatchesEntries;

impl Invariant for ViewMatchesEntries {
    fn name(&self) -> &'static str {
        "view_matches_entries"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        if state.entries.is_empty() && state.lock_rows().next().is_some() {
            return Ok(());
        }

        for entry in &state.entries {
            let Some(row) = state.lock_rows().find(|r| r.physical_lock_id == entry.physical_lock_id)
            else {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("entry {} not displayed", entry.physical_lock_id),
                });
            };
            if row.state != entry.state || row.nearby != entry.nearby {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "lock {} displayed as {:?}/{} but entry is {:?}/{}",
                        row.physical_lock_id, row.state, row.nearby, entry.state, entry.nearby
                    ),
                });
            }
        }

        let displayed = state.lock_rows().count();
        if displayed != state.entries.len() {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{displayed} rows for {} entries", state.entries.len()),
            });
        }
        Ok(())
    }
}

/// Failed locks show a message; other states do not.
pub struct ErrorMessageOnlyWhenFailed;

impl Invariant for ErrorMessageOnlyWhenFailed {
    fn name(&self) -> &'static str {
        "error_message_only_when_failed"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        for row in state.lock_rows() {
            if row.has_error_message != (row.state == LockState::Failed) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "lock {} in {:?} with error message: {}",
                        row.physical_lock_id, row.state, row.has_error_message
                    ),
                });
            }
        }
        Ok(())
    }
}

/// At most one command runs per lock at any time.
pub struct SingleCommandPerLock;

impl Invariant for SingleCommandPerLock {
    fn name(&self) -> &'static str {
        "single_command_per_lock"
    }

    fn check(&self, state: &KeyringSnapshot) -> InvariantResult {
        for (lock_id, max) in &state.max_in_flight {
            if *max > 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("lock {lock_id} ran {max} commands concurrently"),
                });
            }
        }
        Ok(())
    }
}

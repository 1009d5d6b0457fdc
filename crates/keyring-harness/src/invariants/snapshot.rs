//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of the keyring at a point in time.
//! Invariants operate on snapshots rather than live state to ensure
//! consistent, atomic checks.

use std::{collections::HashMap, ops::Sub, time::Duration};

use keyring_app::Keyring;
use keyring_core::{LockState, RosterItem, RosterView};

/// Snapshot of the whole keyring.
#[derive(Debug, Clone, Default)]
pub struct KeyringSnapshot {
    /// Rows of the nearby section, in display order.
    pub nearby: Vec<RowSnapshot>,
    /// Rows of the other section, in display order.
    pub other: Vec<RowSnapshot>,
    /// Sections the view would display.
    pub visible_sections: usize,
    /// Every command machine held by the roster.
    pub entries: Vec<EntrySnapshot>,
    /// Highest number of concurrent commands seen per lock.
    pub max_in_flight: HashMap<String, usize>,
}

impl KeyringSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the view of a keyring and its roster entries.
    pub fn from_keyring<I>(keyring: &Keyring<I>) -> Self
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        let mut snapshot = Self::from_view(keyring.view());
        snapshot.entries = keyring
            .roster()
            .entries()
            .map(|entry| EntrySnapshot {
                physical_lock_id: entry.physical_lock_id().to_string(),
                nearby: entry.is_nearby(),
                state: entry.state(),
            })
            .collect();
        snapshot
    }

    /// Snapshot a published view without roster entries.
    pub fn from_view(view: &RosterView) -> Self {
        Self {
            nearby: view.nearby.iter().map(RowSnapshot::from).collect(),
            other: view.other.iter().map(RowSnapshot::from).collect(),
            visible_sections: view.visible_sections(),
            entries: Vec::new(),
            max_in_flight: HashMap::new(),
        }
    }

    /// Attach per-lock concurrency counts from a communicator.
    pub fn with_max_in_flight(mut self, max_in_flight: HashMap<String, usize>) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Lock rows of both sections.
    pub fn lock_rows(&self) -> impl Iterator<Item = &LockRow> {
        self.nearby.iter().chain(&self.other).filter_map(RowSnapshot::lock)
    }
}

/// One row of a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSnapshot {
    /// A lock row.
    Lock(LockRow),
    /// The "no locks nearby" placeholder.
    Placeholder,
}

impl RowSnapshot {
    /// Lock row. `None` for the placeholder.
    pub fn lock(&self) -> Option<&LockRow> {
        match self {
            Self::Lock(row) => Some(row),
            Self::Placeholder => None,
        }
    }
}

impl From<&RosterItem> for RowSnapshot {
    fn from(item: &RosterItem) -> Self {
        match item {
            RosterItem::Lock(summary) => Self::Lock(LockRow {
                physical_lock_id: summary.physical_lock_id.clone(),
                title: summary.title.clone(),
                nearby: summary.nearby,
                state: summary.state,
                has_error_message: summary.error_message.is_some(),
            }),
            RosterItem::Placeholder => Self::Placeholder,
        }
    }
}

/// Displayed lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    /// Lock id.
    pub physical_lock_id: String,
    /// Display title.
    pub title: String,
    /// In range.
    pub nearby: bool,
    /// Command state.
    pub state: LockState,
    /// An error message is shown.
    pub has_error_message: bool,
}

/// Command machine held by the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Lock id.
    pub physical_lock_id: String,
    /// In range.
    pub nearby: bool,
    /// Command state.
    pub state: LockState,
}

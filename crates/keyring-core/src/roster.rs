//! Lock roster: reconciles known keys against BLE presence.
//!
//! The roster owns one [`LockCommand`] per physical lock id and keeps it alive
//! across refreshes. Entries are looked up by id in a map and updated in place,
//! so an in-flight command survives any number of reconciliations.
//!
//! # Retention
//!
//! An entry is dropped only when its lock id is absent from the latest key list
//! AND its command state is idle. A lock that drops out of range, or whose key
//! disappears, while a command is running or its outcome is displayed stays
//! visible in the nearby section until it returns to idle.

use std::{
    collections::{HashMap, HashSet},
    ops::Sub,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{CommandConfig, LockCommand, LockKey, LockState, Presence};

/// Display snapshot of one roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockSummary {
    /// Stable hardware identifier.
    pub physical_lock_id: String,
    /// Display title.
    pub title: String,
    /// Currently in range.
    pub nearby: bool,
    /// No validity restriction applies.
    pub unlimited_validity: bool,
    /// Formatted start of the offline-access window.
    pub offline_from: Option<String>,
    /// Formatted end of the offline-access window.
    pub offline_until: Option<String>,
    /// Command state.
    pub state: LockState,
    /// Message of the last failure while [`LockState::Failed`].
    pub error_message: Option<String>,
}

impl<I> From<&LockCommand<I>> for LockSummary
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn from(command: &LockCommand<I>) -> Self {
        let details = command.details();
        Self {
            physical_lock_id: details.physical_lock_id.clone(),
            title: details.title.clone(),
            nearby: details.nearby,
            unlimited_validity: details.unlimited_validity,
            offline_from: details.offline_from.clone(),
            offline_until: details.offline_until.clone(),
            state: command.state(),
            error_message: command.error_message().map(str::to_string),
        }
    }
}

/// Row of a roster section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RosterItem {
    /// A lock entry.
    Lock(LockSummary),
    /// "No locks nearby" placeholder; only ever in the nearby section.
    Placeholder,
}

impl RosterItem {
    /// Lock summary. `None` for the placeholder.
    pub fn lock(&self) -> Option<&LockSummary> {
        match self {
            Self::Lock(summary) => Some(summary),
            Self::Placeholder => None,
        }
    }
}

/// Sectioned, display-ordered roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterView {
    /// Locks in range or with a non-idle command, sorted by title. Holds a
    /// single placeholder when empty.
    pub nearby: Vec<RosterItem>,
    /// All other locks, sorted by title.
    pub other: Vec<RosterItem>,
    reconciled: bool,
}

impl RosterView {
    /// Number of sections to display: 0 before the first reconciliation, 1
    /// when the other section is empty, 2 otherwise.
    pub fn visible_sections(&self) -> usize {
        match (self.reconciled, self.other.is_empty()) {
            (false, _) => 0,
            (true, true) => 1,
            (true, false) => 2,
        }
    }

    /// Whether a reconciliation produced this view.
    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    /// Lock ids in the nearby section, in display order.
    pub fn nearby_ids(&self) -> Vec<&str> {
        ids(&self.nearby)
    }

    /// Lock ids in the other section, in display order.
    pub fn other_ids(&self) -> Vec<&str> {
        ids(&self.other)
    }

    /// Summary of the lock with `physical_lock_id`, from either section.
    pub fn find(&self, physical_lock_id: &str) -> Option<&LockSummary> {
        self.nearby
            .iter()
            .chain(&self.other)
            .filter_map(RosterItem::lock)
            .find(|summary| summary.physical_lock_id == physical_lock_id)
    }
}

fn ids(items: &[RosterItem]) -> Vec<&str> {
    items.iter().filter_map(RosterItem::lock).map(|s| s.physical_lock_id.as_str()).collect()
}

/// Authoritative set of locks and their command state machines.
#[derive(Debug, Clone)]
pub struct Roster<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    keys: Vec<LockKey>,
    entries: HashMap<String, LockCommand<I>>,
    /// Entry ids in first-seen order; sort tie-breaker.
    order: Vec<String>,
    config: CommandConfig,
    view: RosterView,
}

impl<I> Roster<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty roster.
    pub fn new(config: CommandConfig) -> Self {
        Self {
            keys: Vec::new(),
            entries: HashMap::new(),
            order: Vec::new(),
            config,
            view: RosterView::default(),
        }
    }

    /// Replace the key list wholesale. Takes effect at the next reconcile.
    pub fn set_keys(&mut self, keys: Vec<LockKey>) {
        self.keys = keys;
    }

    /// Latest key list.
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    /// Entry for a lock id.
    pub fn entry(&self, physical_lock_id: &str) -> Option<&LockCommand<I>> {
        self.entries.get(physical_lock_id)
    }

    /// Mutable entry for a lock id.
    pub fn entry_mut(&mut self, physical_lock_id: &str) -> Option<&mut LockCommand<I>> {
        self.entries.get_mut(physical_lock_id)
    }

    /// All entries, unordered.
    pub fn entries(&self) -> impl Iterator<Item = &LockCommand<I>> {
        self.entries.values()
    }

    /// All entries mutably, unordered.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut LockCommand<I>> {
        self.entries.values_mut()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last built view.
    pub fn view(&self) -> &RosterView {
        &self.view
    }

    /// Time until the earliest entry deadline. `None` if nothing is armed.
    pub fn next_due(&self, now: I) -> Option<Duration> {
        self.entries.values().filter_map(|entry| entry.next_due(now)).min()
    }

    /// Reconcile the key list against current presence and rebuild the view.
    ///
    /// Creates entries for new lock ids, updates existing ones in place, and
    /// drops entries that are both idle and absent from the key list.
    pub fn reconcile(&mut self, presence: &impl Presence) -> &RosterView {
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(self.keys.len());

        for key in &self.keys {
            let Some(id) = key.physical_lock_id() else {
                tracing::debug!("skipping key without resolvable grant");
                continue;
            };
            if !seen.insert(id.to_string()) {
                tracing::debug!(lock_id = %id, "duplicate key for lock, keeping first");
                continue;
            }

            let Some(details) = key.details(presence.is_nearby(id)) else {
                continue;
            };

            match self.entries.get_mut(id) {
                Some(entry) => {
                    entry.update_data(details);
                },
                None => {
                    tracing::debug!(lock_id = %id, "lock added to roster");
                    self.entries.insert(id.to_string(), LockCommand::new(details, self.config));
                },
            }
            order.push(id.to_string());
        }

        // Entries whose key vanished: keep while busy, drop once idle.
        let mut orphans: Vec<String> = Vec::new();
        self.entries.retain(|id, entry| {
            if seen.contains(id) {
                return true;
            }
            if entry.is_idle() {
                let cancelled = entry.teardown();
                debug_assert!(cancelled.is_empty(), "idle entry had an outstanding operation");
                tracing::debug!(lock_id = %id, "lock removed from roster");
                return false;
            }
            entry.set_nearby(presence.is_nearby(id));
            orphans.push(id.clone());
            true
        });
        orphans.sort();
        order.extend(orphans);

        self.order = order;
        self.refresh_view()
    }

    /// Rebuild sections from current entries without consulting presence.
    ///
    /// Used after command state changes, which can pin or unpin an entry in the
    /// nearby section.
    pub fn refresh_view(&mut self) -> &RosterView {
        let mut all: Vec<&LockCommand<I>> =
            self.order.iter().filter_map(|id| self.entries.get(id)).collect();
        all.sort_by(|a, b| a.title().cmp(b.title()));

        let (nearby, other): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|entry| entry.is_nearby() || !entry.is_idle());

        let mut nearby: Vec<RosterItem> =
            nearby.into_iter().map(|entry| RosterItem::Lock(entry.into())).collect();
        if nearby.is_empty() {
            nearby.push(RosterItem::Placeholder);
        }
        let other = other.into_iter().map(|entry| RosterItem::Lock(entry.into())).collect();

        self.view = RosterView { nearby, other, reconciled: true };
        &self.view
    }

    /// Release every entry's outstanding operation and deadline.
    ///
    /// Returns the ids and operations that must be cancelled.
    pub fn teardown(&mut self) -> Vec<(String, crate::CommandAction)> {
        let mut actions = Vec::new();
        for (id, entry) in &mut self.entries {
            actions.extend(entry.teardown().into_iter().map(|action| (id.clone(), action)));
        }
        actions
    }
}

//! Keyring orchestration state machine.
//!
//! This module defines the [`Keyring`] state machine, which ties the key
//! store, the BLE scanner and the per-lock command machines together without
//! performing any I/O itself.
//!
//! This is a pure state machine: it consumes [`crate::KeyringEvent`] inputs and
//! produces [`crate::KeyringAction`] instructions for the runtime to execute.
//! Presence is read synchronously from the scanner passed to
//! [`Keyring::handle`]; time is always an input.
//!
//! # Responsibilities
//!
//! - Observer lifecycle: foreground starts observing, background stops it.
//! - Key queries: at most one in flight, skipped without a signed-in user.
//!   Each query carries a [`QueryId`]; a result for any other query is stale.
//!   Changing the user cancels the outstanding query and clears the keys.
//! - Scan lifecycle: scanning is wanted exactly when the user holds keys.
//! - Routing triggers, outcomes and deadlines to the right [`LockCommand`].
//! - Rebuilding the roster view and notifying observers.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use keyring_core::{
    CommandAction, KeyStoreError, LockCommand, LockKey, LockState, Presence, Roster, RosterView,
    UserId,
};

use crate::{
    AdapterState, BluetoothWarning, KeyringAction, KeyringConfig, KeyringEvent,
    KeyringNotification, QueryId,
};

/// Keyring state machine.
///
/// Pure state machine that processes events and produces actions.
/// No I/O dependencies - fully testable in simulation.
#[derive(Debug, Clone)]
pub struct Keyring<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    roster: Roster<I>,
    /// Signed-in user. `None` disables key queries.
    user_id: Option<UserId>,
    /// Outstanding key query.
    query: Option<QueryId>,
    next_query: u64,
    /// Observers are registered (app in the foreground).
    observing: bool,
    /// The user holds at least one key, so scanning is wanted.
    should_scan: bool,
    /// A scan registration is held.
    scanning: bool,
    adapter: AdapterState,
}

impl<I> Keyring<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a keyring that is neither observing nor scanning.
    pub fn new(config: KeyringConfig) -> Self {
        Self {
            roster: Roster::new(config.command),
            user_id: config.user_id,
            query: None,
            next_query: 1,
            observing: false,
            should_scan: false,
            scanning: false,
            adapter: AdapterState::default(),
        }
    }

    /// Process an event and return actions.
    pub fn handle(
        &mut self,
        event: KeyringEvent,
        presence: &impl Presence,
        now: I,
    ) -> Vec<KeyringAction> {
        match event {
            KeyringEvent::Foreground => self.start_observing(),
            KeyringEvent::Background => self.stop_observing(),
            KeyringEvent::ActiveUserChanged(user_id) => self.set_user(user_id, presence),
            KeyringEvent::RefreshKeys | KeyringEvent::KeysChanged => self.refresh_keys(),
            KeyringEvent::KeysLoaded { query, result } => self.keys_loaded(query, result, presence),
            KeyringEvent::ScanResultsChanged => self.reconcile(presence),
            KeyringEvent::AdapterChanged(adapter) => {
                self.adapter = adapter;
                let mut actions = self.evaluate_scan();
                actions.push(KeyringAction::Notify(KeyringNotification::BluetoothChanged));
                actions
            },
            KeyringEvent::Trigger { lock_id } => {
                let Some(entry) = self.roster.entry_mut(&lock_id) else {
                    tracing::debug!(%lock_id, "trigger for unknown lock ignored");
                    return vec![];
                };
                let address = presence.lookup_address(&lock_id);
                let actions = entry.trigger(address, now);
                self.apply(vec![(lock_id, actions)], presence)
            },
            KeyringEvent::CommandCompleted { lock_id, op, outcome } => {
                let Some(entry) = self.roster.entry_mut(&lock_id) else {
                    tracing::debug!(%lock_id, %op, "outcome for removed lock ignored");
                    return vec![];
                };
                let actions = entry.handle_outcome(op, outcome, now);
                self.apply(vec![(lock_id, actions)], presence)
            },
            KeyringEvent::Tick => {
                let batches: Vec<(String, Vec<CommandAction>)> = self
                    .roster
                    .entries_mut()
                    .map(|entry| {
                        let actions = entry.tick(now);
                        (entry.physical_lock_id().to_string(), actions)
                    })
                    .filter(|(_, actions)| !actions.is_empty())
                    .collect();
                self.apply(batches, presence)
            },
        }
    }

    /// Warning to show instead of the roster. `None` unless scanning is wanted
    /// but the adapter cannot deliver it.
    pub fn bluetooth_warning(&self) -> Option<BluetoothWarning> {
        if !self.should_scan {
            None
        } else if !self.adapter.powered_on {
            Some(BluetoothWarning::Disabled)
        } else if !self.adapter.authorized {
            Some(BluetoothWarning::Unauthorized)
        } else {
            None
        }
    }

    /// Time until the earliest command deadline. `None` if nothing is armed.
    pub fn next_due(&self, now: I) -> Option<Duration> {
        self.roster.next_due(now)
    }

    /// Release everything: outstanding commands, the scan and observers.
    pub fn teardown(&mut self) -> Vec<KeyringAction> {
        let mut actions: Vec<KeyringAction> = self
            .roster
            .teardown()
            .into_iter()
            .filter_map(|(lock_id, action)| match action {
                CommandAction::Cancel { op } => Some(KeyringAction::Cancel { lock_id, op }),
                _ => None,
            })
            .collect();
        if let Some(query) = self.query.take() {
            actions.push(KeyringAction::CancelQuery { query });
        }
        if self.observing {
            self.observing = false;
            actions.push(KeyringAction::StopObserving);
        }
        if self.scanning {
            self.scanning = false;
            actions.push(KeyringAction::StopScan);
        }
        actions
    }

    /// Current roster view.
    pub fn view(&self) -> &RosterView {
        self.roster.view()
    }

    /// The roster and its command machines.
    pub fn roster(&self) -> &Roster<I> {
        &self.roster
    }

    /// Command state of a lock. `None` if the lock is not in the roster.
    pub fn lock_state(&self, lock_id: &str) -> Option<LockState> {
        self.roster.entry(lock_id).map(LockCommand::state)
    }

    /// Signed-in user.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Observers are registered.
    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Scanning is wanted.
    pub fn should_scan(&self) -> bool {
        self.should_scan
    }

    /// A scan registration is held.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// A key query is outstanding.
    pub fn query_in_progress(&self) -> bool {
        self.query.is_some()
    }

    /// Outstanding key query, the only one whose result is applied.
    pub fn outstanding_query(&self) -> Option<QueryId> {
        self.query
    }

    /// Last reported adapter state.
    pub fn adapter(&self) -> AdapterState {
        self.adapter
    }

    fn start_observing(&mut self) -> Vec<KeyringAction> {
        let mut actions = Vec::new();
        if self.observing {
            tracing::warn!("keyring lifecycle issue detected, observers were not closed");
            actions.push(KeyringAction::StopObserving);
        }
        self.observing = true;
        actions.push(KeyringAction::Observe);
        actions.extend(self.evaluate_scan());
        actions.extend(self.refresh_keys());
        actions
    }

    fn stop_observing(&mut self) -> Vec<KeyringAction> {
        if !self.observing {
            tracing::debug!("background without foreground, nothing to stop");
            return vec![];
        }
        self.observing = false;
        let mut actions = vec![KeyringAction::StopObserving];
        if self.scanning {
            self.scanning = false;
            actions.push(KeyringAction::StopScan);
        }
        actions
    }

    /// Switch to another user, or none after sign-out.
    ///
    /// Keys of the previous user never outlive the switch: the outstanding
    /// query is cancelled and the key list cleared before querying anew.
    fn set_user(&mut self, user_id: Option<UserId>, presence: &impl Presence) -> Vec<KeyringAction> {
        if self.user_id == user_id {
            return vec![];
        }
        match &user_id {
            Some(user_id) => tracing::info!(%user_id, "active user changed"),
            None => tracing::info!("user signed out, clearing keys"),
        }
        self.user_id = user_id;

        let mut actions = Vec::new();
        if let Some(query) = self.query.take() {
            tracing::debug!(%query, "cancelling key query of previous user");
            actions.push(KeyringAction::CancelQuery { query });
        }
        if !self.roster.keys().is_empty() {
            actions.extend(self.apply_keys(Ok(Vec::new()), presence));
        }
        actions.extend(self.refresh_keys());
        actions
    }

    fn refresh_keys(&mut self) -> Vec<KeyringAction> {
        if let Some(query) = self.query {
            tracing::debug!(%query, "key query already in progress");
            return vec![];
        }
        let Some(user_id) = self.user_id.clone() else {
            tracing::debug!("no active user, skipping key query");
            return vec![];
        };
        let query = QueryId(self.next_query);
        self.next_query += 1;
        self.query = Some(query);
        vec![KeyringAction::QueryKeys { query, user_id }]
    }

    fn keys_loaded(
        &mut self,
        query: QueryId,
        result: Result<Vec<LockKey>, KeyStoreError>,
        presence: &impl Presence,
    ) -> Vec<KeyringAction> {
        if self.query != Some(query) {
            tracing::debug!(%query, "stale key query result ignored");
            return vec![];
        }
        self.query = None;
        self.apply_keys(result, presence)
    }

    fn apply_keys(
        &mut self,
        result: Result<Vec<LockKey>, KeyStoreError>,
        presence: &impl Presence,
    ) -> Vec<KeyringAction> {
        let mut actions = Vec::new();

        match result {
            Ok(keys) => {
                tracing::debug!(count = keys.len(), "keys loaded");
                let should_scan = !keys.is_empty();
                self.roster.set_keys(keys);
                if should_scan != self.should_scan {
                    self.should_scan = should_scan;
                    actions.extend(self.evaluate_scan());
                    actions.push(KeyringAction::Notify(KeyringNotification::BluetoothChanged));
                }
            },
            Err(error) if error.is_transient() => {
                tracing::warn!(%error, "failed to query local keys");
            },
            Err(error) => {
                tracing::error!(%error, "failed to query local keys");
            },
        }

        actions.extend(self.reconcile(presence));
        actions
    }

    fn reconcile(&mut self, presence: &impl Presence) -> Vec<KeyringAction> {
        self.roster.reconcile(presence);
        vec![KeyringAction::Notify(KeyringNotification::RosterUpdated)]
    }

    /// Bring the scan registration in line with the scan wish.
    ///
    /// A registration is acquired only while observing with a ready adapter. It
    /// is released when scanning is no longer wanted; losing the adapter alone
    /// keeps it.
    fn evaluate_scan(&mut self) -> Vec<KeyringAction> {
        let can_start = self.should_scan && self.observing && self.adapter.is_ready();
        if can_start && !self.scanning {
            self.scanning = true;
            vec![KeyringAction::StartScan]
        } else if !self.should_scan && self.scanning {
            self.scanning = false;
            vec![KeyringAction::StopScan]
        } else {
            vec![]
        }
    }

    /// Translate per-lock command actions and refresh the view if needed.
    fn apply(
        &mut self,
        batches: Vec<(String, Vec<CommandAction>)>,
        presence: &impl Presence,
    ) -> Vec<KeyringAction> {
        let mut actions = Vec::new();
        let mut state_changed = false;
        let mut returned_to_idle = false;

        for (lock_id, batch) in batches {
            for action in batch {
                match action {
                    CommandAction::Execute { op, address, physical_lock_id, command, timeout } => {
                        actions.push(KeyringAction::Execute {
                            lock_id: physical_lock_id,
                            op,
                            address,
                            command,
                            timeout,
                        });
                    },
                    CommandAction::Cancel { op } => {
                        actions.push(KeyringAction::Cancel { lock_id: lock_id.clone(), op });
                    },
                    CommandAction::StateChanged(state) => {
                        state_changed = true;
                        actions.push(KeyringAction::Notify(KeyringNotification::LockStateChanged {
                            lock_id: lock_id.clone(),
                            state,
                        }));
                    },
                    CommandAction::ReturnedToIdle => {
                        returned_to_idle = true;
                        actions.push(KeyringAction::Notify(
                            KeyringNotification::LockReturnedToIdle { lock_id: lock_id.clone() },
                        ));
                    },
                }
            }
        }

        // Back to idle may prune an orphan, which needs the full reconcile.
        if returned_to_idle {
            actions.extend(self.reconcile(presence));
        } else if state_changed {
            self.roster.refresh_view();
            actions.push(KeyringAction::Notify(KeyringNotification::RosterUpdated));
        }
        actions
    }
}

//! Keyring input events.
//!
//! This module defines [`KeyringEvent`], the complete set of inputs that drive
//! the [`crate::Keyring`] state machine.
//!
//! Events originate from three sources:
//! - The application shell (foreground/background, adapter state, user taps).
//! - Collaborator notifications (key store changes, scan results).
//! - Completions of asynchronous work marshalled back by the runtime.

use keyring_core::{CommandOutcome, KeyStoreError, LockKey, OperationId, UserId};

use crate::{AdapterState, QueryId};

/// Events processed by the Keyring state machine.
#[derive(Debug, Clone)]
pub enum KeyringEvent {
    /// App entered the foreground: start observing collaborators.
    Foreground,

    /// App entered the background: stop observing and release the scan.
    Background,

    /// Signed-in user changed. `None` after sign-out.
    ActiveUserChanged(Option<UserId>),

    /// Explicit request to re-query the key store.
    RefreshKeys,

    /// Key store reported that its key set changed.
    KeysChanged,

    /// Key query finished.
    KeysLoaded {
        /// Query the result belongs to.
        query: QueryId,
        /// Keys, or why the query failed.
        result: Result<Vec<LockKey>, KeyStoreError>,
    },

    /// Scanner reported new scan results.
    ScanResultsChanged,

    /// Bluetooth adapter state changed.
    AdapterChanged(AdapterState),

    /// User asked to open a lock.
    Trigger {
        /// Target lock.
        lock_id: String,
    },

    /// Command operation finished.
    CommandCompleted {
        /// Lock the command was issued for.
        lock_id: String,
        /// Operation id issued with the command.
        op: OperationId,
        /// What happened.
        outcome: CommandOutcome,
    },

    /// A deadline may have elapsed.
    Tick,
}

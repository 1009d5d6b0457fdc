//! Keyring side-effects and notifications.
//!
//! This module defines the [`KeyringAction`] enum, which represents
//! instructions produced by the [`crate::Keyring`] state machine for the
//! runtime to execute, and [`KeyringNotification`], which the runtime
//! broadcasts to observers.

use std::{fmt, time::Duration};

use keyring_core::{BleAddress, CommandSpec, LockState, OperationId, UserId};

/// Identifies one key query issued by the [`crate::Keyring`].
///
/// A result is applied only while its query is the outstanding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query-{}", self.0)
    }
}

/// Actions produced by the Keyring state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyringAction {
    /// Register key-store and scan-result observers.
    Observe,

    /// Close the observer registrations.
    StopObserving,

    /// Query the key store for the user's local keys.
    QueryKeys {
        /// Id to report the result with.
        query: QueryId,
        /// User to query.
        user_id: UserId,
    },

    /// Cancel an outstanding key query. Its result, if any, is stale.
    CancelQuery {
        /// Query to cancel.
        query: QueryId,
    },

    /// Acquire a scan registration.
    StartScan,

    /// Release the scan registration.
    StopScan,

    /// Execute a command through the lock communicator.
    Execute {
        /// Target lock.
        lock_id: String,
        /// Operation id to report the outcome with.
        op: OperationId,
        /// Current BLE address.
        address: BleAddress,
        /// Command to run.
        command: CommandSpec,
        /// Bound passed on to the communicator.
        timeout: Duration,
    },

    /// Cancel an outstanding command operation.
    Cancel {
        /// Target lock.
        lock_id: String,
        /// Operation to cancel.
        op: OperationId,
    },

    /// Broadcast a notification to observers.
    Notify(KeyringNotification),
}

/// Notifications delivered to keyring subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyringNotification {
    /// A lock changed command state.
    LockStateChanged {
        /// Lock that changed.
        lock_id: String,
        /// New state.
        state: LockState,
    },

    /// A lock returned to idle after displaying an outcome.
    LockReturnedToIdle {
        /// Lock that returned to idle.
        lock_id: String,
    },

    /// The roster view was rebuilt.
    RosterUpdated,

    /// Bluetooth availability or the scan wish changed.
    BluetoothChanged,
}

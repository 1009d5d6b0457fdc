//! Collaborator traits for abstracting platform I/O.
//!
//! The keyring talks to three collaborators: the key store, the BLE scanner
//! and the lock communicator. Each platform implements these traits, while the
//! generic [`crate::Runtime`] handles all orchestration. The simulation
//! harness provides scripted implementations of all three.
//!
//! Long-running operations take a [`CancellationToken`]. The runtime cancels
//! it on timeout, on teardown, and when the requesting scope ends.

use std::{future::Future, time::Duration};

use keyring_core::{
    BleAddress, CommandResultCode, CommandSpec, CommunicatorError, KeyStoreError, LockKey,
    Presence, UserId,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Source of the user's lock keys.
pub trait KeyStore: Send + Sync + 'static {
    /// Query the keys stored locally for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Cancelled`] if `cancel` fires first, or another
    /// variant if the store cannot answer.
    fn query_local_keys(
        &self,
        user_id: &UserId,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Vec<LockKey>, KeyStoreError>> + Send;

    /// Ask the backend for new keys. Completion means the poll finished; any
    /// new keys arrive through [`KeyStore::key_updates`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn poll_notifications(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), KeyStoreError>> + Send;

    /// Subscribe to key-set change notifications.
    fn key_updates(&self) -> broadcast::Receiver<()>;
}

/// BLE scanner that knows which locks are in range.
///
/// Presence queries are synchronous reads of the latest scan results.
pub trait LockScanner: Presence + Send + Sync + 'static {
    /// Scan registration. Scanning continues until it is dropped.
    type Registration: Send + 'static;

    /// Register interest in scanning.
    fn start_scan(&self) -> Self::Registration;

    /// Subscribe to scan-result change notifications.
    fn scan_updates(&self) -> broadcast::Receiver<()>;
}

/// Executes commands against a lock over BLE.
pub trait LockCommunicator: Send + Sync + 'static {
    /// Connect to the lock at `address` and run `command`.
    ///
    /// # Errors
    ///
    /// Returns [`CommunicatorError::Cancelled`] if `cancel` fires first, or
    /// [`CommunicatorError::Transport`] if no result code could be obtained.
    fn execute_command(
        &self,
        address: &BleAddress,
        physical_lock_id: &str,
        command: CommandSpec,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandResultCode, CommunicatorError>> + Send;
}

//! Error types for the keyring collaborators.
//!
//! Failures of the key store and the lock communicator are strongly typed so
//! the orchestration layer can log them precisely. None of these errors ever
//! reach the caller of a trigger: command failures terminate at the
//! [`crate::LockCommand`] boundary as a `Failed` state with a display message.

use thiserror::Error;

/// Errors reported by the key store collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// No signed-in user, or the store is not ready yet.
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    /// The query was cancelled before it completed.
    #[error("key query cancelled")]
    Cancelled,

    /// The query itself failed.
    #[error("key query failed: {0}")]
    Query(String),
}

impl KeyStoreError {
    /// Returns true if the failure may resolve on its own (retry on the next
    /// change notification or pull-to-refresh).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Cancelled)
    }
}

/// Errors raised by the lock communicator while executing a command.
///
/// These are the "exception" path: a result code was never produced. The
/// command state machine maps every variant to the technical-error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommunicatorError {
    /// The command was cancelled (timeout or teardown).
    #[error("command cancelled")]
    Cancelled,

    /// BLE connection or transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

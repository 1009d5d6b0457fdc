//! Core of the nearby-lock keyring.
//!
//! Pure, I/O-free state machines for triggering locks over BLE:
//!
//! - [`LockCommand`]: per-lock command lifecycle (idle, in progress,
//!   succeeded, failed) with command timeout and idle-revert deadlines
//! - [`Roster`]: reconciles the key list against BLE presence, keeps one
//!   [`LockCommand`] per physical lock alive across refreshes, and builds the
//!   sectioned [`RosterView`]
//!
//! Time is always an input. The [`env::Environment`] trait supplies it to the
//! runtime, which feeds it to the state machines.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod command;
pub mod env;
mod error;
mod key;
mod presence;
mod result;
mod roster;

pub use command::{
    CommandAction, CommandConfig, CommandOutcome, CommandSpec, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_ERROR_DISPLAY, DEFAULT_SUCCESS_DISPLAY, LockCommand, LockState, OperationId,
};
pub use error::{CommunicatorError, KeyStoreError};
pub use key::{BoundLock, Grant, LockDetails, LockKey, OFFLINE_DATE_FORMAT, UserId};
pub use presence::{BleAddress, Presence};
pub use result::{CommandResultCode, GENERIC_ERROR_MESSAGE, UnknownResultCode};
pub use roster::{LockSummary, Roster, RosterItem, RosterView};

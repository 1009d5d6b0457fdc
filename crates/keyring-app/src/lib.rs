//! Application layer for the keyring
//!
//! Pure orchestration state machine and generic runtime for the nearby-lock
//! keyring, enabling deterministic simulation testing with the same code that
//! runs in production.
//!
//! # Components
//!
//! - [`Keyring`]: orchestration state machine (observers, key queries, scan
//!   lifecycle, command routing)
//! - [`KeyStore`], [`LockScanner`], [`LockCommunicator`]: traits for
//!   platform-specific I/O
//! - [`Runtime`]: generic orchestration loop using those traits
//! - [`KeyringHandle`]: commands, subscriptions and watched state for the
//!   application shell

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
mod driver;
mod event;
mod keyring;
mod runtime;
mod state;
mod system_env;

pub use action::{KeyringAction, KeyringNotification, QueryId};
pub use driver::{KeyStore, LockCommunicator, LockScanner};
pub use event::KeyringEvent;
pub use keyring::Keyring;
pub use runtime::{KeyringHandle, Runtime, RuntimeError, Subscription};
pub use state::{AdapterState, BluetoothWarning, KeyringConfig};
pub use system_env::SystemEnv;

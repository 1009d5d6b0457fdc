//! Deterministic simulation harness for keyring testing.
//!
//! In-memory implementations of the keyring collaborators: [`SimKeyStore`],
//! [`SimScanner`] and [`SimCommunicator`]. They run on tokio time, so tests
//! under a paused clock are deterministic and finish instantly.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the roster
//! invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_communicator;
pub mod sim_key_store;
pub mod sim_scanner;

pub use invariants::{
    BusyLocksPinnedNearby, EntrySnapshot, ErrorMessageOnlyWhenFailed, Invariant,
    InvariantRegistry, InvariantResult, KeyringSnapshot, LockRow, PlaceholderOnlyWhenNearbyEmpty,
    RowSnapshot, SectionsSortedByTitle, SingleCommandPerLock, UniqueLockIds, ViewMatchesEntries,
    Violation,
};
pub use sim_communicator::{ExecutedCommand, SimCommunicator, Step};
pub use sim_key_store::SimKeyStore;
pub use sim_scanner::{ScanRegistration, SimScanner, address_for};

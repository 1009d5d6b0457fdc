//! Scripted keyring sessions for the `keyring` binary.
//!
//! Runs the keyring runtime against the simulated key store, scanner and
//! communicator from `keyring-harness`, with keys loaded from a JSON fixture.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod fixture;
pub mod session;

pub use fixture::{BUILTIN_KEYS, FixtureError, load_keys, parse_failure, parse_keys};
pub use session::{DEFAULT_SETTLE_TIMEOUT, SessionConfig, SessionError, SessionReport, run};

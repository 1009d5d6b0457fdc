//! Environment abstraction for deterministic testing.
//!
//! Decouples the command and roster state machines from wall-clock time. The
//! state machines only ever see instants passed in by the caller, so tests can
//! use virtual time (tokio's paused clock, or plain `Instant` offsets) and
//! production uses the system clock.

use std::time::Duration;

/// Abstract environment providing time and async sleeping.
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production uses `tokio::time::Instant` so that paused-clock tests and
    /// the real runtime share the same implementation.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only used by runtime code to wait for the next state machine deadline,
    /// never by the state machines themselves.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

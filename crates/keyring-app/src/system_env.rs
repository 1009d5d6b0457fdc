//! Production Environment implementation using tokio time.
//!
//! `SystemEnv` reads `tokio::time::Instant`, which follows the real clock in
//! production and the virtual clock when a test runtime pauses time. The same
//! runtime code therefore runs unchanged under `#[tokio::test(start_paused =
//! true)]`.

use std::time::Duration;

use keyring_core::env::Environment;

/// Production environment backed by the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

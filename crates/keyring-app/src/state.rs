//! Observable keyring state types.
//!
//! Platform-facing state that is not part of the roster itself: Bluetooth
//! adapter status, the warning derived from it, and keyring configuration.

use keyring_core::{CommandConfig, UserId};

/// Bluetooth adapter state as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterState {
    /// Adapter is powered on.
    pub powered_on: bool,
    /// App is authorized to use Bluetooth.
    pub authorized: bool,
}

impl AdapterState {
    /// Powered on and authorized.
    pub const READY: Self = Self { powered_on: true, authorized: true };

    /// Scanning is possible.
    pub fn is_ready(self) -> bool {
        self.powered_on && self.authorized
    }
}

/// Warning to show instead of the roster when scanning is wanted but
/// impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothWarning {
    /// Bluetooth is switched off.
    Disabled,
    /// The app is not authorized to use Bluetooth.
    Unauthorized,
}

/// Keyring configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyringConfig {
    /// Per-lock command timing.
    pub command: CommandConfig,
    /// User whose keys are queried. `None` until someone signs in.
    pub user_id: Option<UserId>,
}

impl KeyringConfig {
    /// Default timing for the given user.
    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        Self { command: CommandConfig::default(), user_id: Some(user_id.into()) }
    }
}

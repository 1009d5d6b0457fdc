//! BLE presence as seen by the scanner.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bluetooth address of a nearby lock, as reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BleAddress(pub String);

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Synchronous view of current BLE presence.
///
/// Implemented by the scanner collaborator. Queried by the state machines at
/// reconciliation and trigger time; answers reflect the latest scan results.
pub trait Presence {
    /// Whether the lock is currently in range.
    fn is_nearby(&self, physical_lock_id: &str) -> bool;

    /// Current address of the lock. `None` if it is not in range.
    fn lookup_address(&self, physical_lock_id: &str) -> Option<BleAddress>;
}

impl<P: Presence + ?Sized> Presence for &P {
    fn is_nearby(&self, physical_lock_id: &str) -> bool {
        (**self).is_nearby(physical_lock_id)
    }

    fn lookup_address(&self, physical_lock_id: &str) -> Option<BleAddress> {
        (**self).lookup_address(physical_lock_id)
    }
}

impl<P: Presence + ?Sized> Presence for std::sync::Arc<P> {
    fn is_nearby(&self, physical_lock_id: &str) -> bool {
        (**self).is_nearby(physical_lock_id)
    }

    fn lookup_address(&self, physical_lock_id: &str) -> Option<BleAddress> {
        (**self).lookup_address(physical_lock_id)
    }
}

//! Simulated BLE scanner.
//!
//! Tests move locks in and out of range explicitly. Every change notifies scan
//! observers, the same way a platform scanner reports new advertisements.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use keyring_app::LockScanner;
use keyring_core::{BleAddress, Presence};
use tokio::sync::broadcast;

/// Shared simulated [`LockScanner`]. Clones share state.
#[derive(Debug, Clone)]
pub struct SimScanner {
    nearby: Arc<Mutex<HashMap<String, BleAddress>>>,
    registrations: Arc<AtomicUsize>,
    updates: broadcast::Sender<()>,
}

impl Default for SimScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SimScanner {
    /// Create a scanner with nothing in range.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            nearby: Arc::new(Mutex::new(HashMap::new())),
            registrations: Arc::new(AtomicUsize::new(0)),
            updates,
        }
    }

    /// Create a scanner with `lock_ids` in range.
    pub fn with_nearby(lock_ids: &[&str]) -> Self {
        let scanner = Self::new();
        scanner.nearby().extend(lock_ids.iter().map(|id| (id.to_string(), address_for(id))));
        scanner
    }

    /// Bring a lock into range and notify observers.
    pub fn bring_in_range(&self, lock_id: &str) {
        self.nearby().insert(lock_id.to_string(), address_for(lock_id));
        self.notify();
    }

    /// Move a lock out of range and notify observers.
    pub fn move_out_of_range(&self, lock_id: &str) {
        self.nearby().remove(lock_id);
        self.notify();
    }

    /// Replace the set of locks in range and notify observers.
    pub fn set_nearby(&self, lock_ids: &[&str]) {
        {
            let mut nearby = self.nearby();
            nearby.clear();
            nearby.extend(lock_ids.iter().map(|id| (id.to_string(), address_for(id))));
        }
        self.notify();
    }

    /// Number of scan registrations currently held.
    pub fn active_scans(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Number of live scan-result subscribers.
    pub fn observer_count(&self) -> usize {
        self.updates.receiver_count()
    }

    fn notify(&self) {
        let _ = self.updates.send(());
    }

    fn nearby(&self) -> MutexGuard<'_, HashMap<String, BleAddress>> {
        self.nearby.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deterministic fake address for a lock.
pub fn address_for(lock_id: &str) -> BleAddress {
    BleAddress(format!("sim-{lock_id}"))
}

impl Presence for SimScanner {
    fn is_nearby(&self, physical_lock_id: &str) -> bool {
        self.nearby().contains_key(physical_lock_id)
    }

    fn lookup_address(&self, physical_lock_id: &str) -> Option<BleAddress> {
        self.nearby().get(physical_lock_id).cloned()
    }
}

impl LockScanner for SimScanner {
    type Registration = ScanRegistration;

    fn start_scan(&self) -> ScanRegistration {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        ScanRegistration { registrations: Arc::clone(&self.registrations) }
    }

    fn scan_updates(&self) -> broadcast::Receiver<()> {
        self.updates.subscribe()
    }
}

/// Held while scanning. Dropping it releases the scan.
#[derive(Debug)]
pub struct ScanRegistration {
    registrations: Arc<AtomicUsize>,
}

impl Drop for ScanRegistration {
    fn drop(&mut self) {
        self.registrations.fetch_sub(1, Ordering::SeqCst);
    }
}

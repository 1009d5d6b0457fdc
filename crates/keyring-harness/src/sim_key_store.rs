//! In-memory key store for simulation.
//!
//! Holds keys per user, optionally delays queries, and can be scripted to
//! fail. Keys staged with [`SimKeyStore::stage_for_poll`] are published when
//! the runtime polls the backend, which mirrors a push-notification fetch.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use keyring_app::KeyStore;
use keyring_core::{KeyStoreError, LockKey, UserId};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct State {
    keys: HashMap<UserId, Vec<LockKey>>,
    staged: HashMap<UserId, Vec<LockKey>>,
    latency: Duration,
    fail_next_query: Option<KeyStoreError>,
    fail_next_poll: Option<KeyStoreError>,
    queries: usize,
    polls: usize,
    /// Queries started and not yet finished, by start order.
    live: Vec<(usize, CancellationToken)>,
    max_live: usize,
}

/// Shared in-memory [`KeyStore`]. Clones share state.
#[derive(Debug, Clone)]
pub struct SimKeyStore {
    state: Arc<Mutex<State>>,
    updates: broadcast::Sender<()>,
}

impl Default for SimKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(16);
        Self { state: Arc::new(Mutex::new(State::default())), updates }
    }

    /// Create a store holding `keys` for `user_id`.
    pub fn with_keys(user_id: impl Into<UserId>, keys: Vec<LockKey>) -> Self {
        let store = Self::new();
        store.state().keys.insert(user_id.into(), keys);
        store
    }

    /// Replace the user's keys and notify observers.
    pub fn set_keys(&self, user_id: impl Into<UserId>, keys: Vec<LockKey>) {
        self.state().keys.insert(user_id.into(), keys);
        self.notify();
    }

    /// Keys that the next successful poll publishes for the user.
    pub fn stage_for_poll(&self, user_id: impl Into<UserId>, keys: Vec<LockKey>) {
        self.state().staged.insert(user_id.into(), keys);
    }

    /// Delay every query and poll by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Fail the next query with `error`.
    pub fn fail_next_query(&self, error: KeyStoreError) {
        self.state().fail_next_query = Some(error);
    }

    /// Fail the next poll with `error`.
    pub fn fail_next_poll(&self, error: KeyStoreError) {
        self.state().fail_next_poll = Some(error);
    }

    /// Number of queries started.
    pub fn query_count(&self) -> usize {
        self.state().queries
    }

    /// Most queries that were ever running uncancelled at the same time.
    pub fn max_live_queries(&self) -> usize {
        self.state().max_live
    }

    /// Number of polls started.
    pub fn poll_count(&self) -> usize {
        self.state().polls
    }

    /// Number of live change-notification subscribers.
    pub fn observer_count(&self) -> usize {
        self.updates.receiver_count()
    }

    fn notify(&self) {
        // No observers is fine; the next foreground queries anyway.
        let _ = self.updates.send(());
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyStore for SimKeyStore {
    fn query_local_keys(
        &self,
        user_id: &UserId,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Vec<LockKey>, KeyStoreError>> + Send {
        let (latency, failure, live) = {
            let mut state = self.state();
            state.queries += 1;
            let id = state.queries;
            state.live.retain(|(_, token)| !token.is_cancelled());
            state.live.push((id, cancel.clone()));
            state.max_live = state.max_live.max(state.live.len());
            let live = LiveQuery { store: self.clone(), id };
            (state.latency, state.fail_next_query.take(), live)
        };
        let store = self.clone();
        let user_id = user_id.clone();

        async move {
            let _live = live;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(KeyStoreError::Cancelled),
                () = tokio::time::sleep(latency) => {},
            }
            if let Some(error) = failure {
                return Err(error);
            }
            Ok(store.state().keys.get(&user_id).cloned().unwrap_or_default())
        }
    }

    fn poll_notifications(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), KeyStoreError>> + Send {
        let (latency, failure) = {
            let mut state = self.state();
            state.polls += 1;
            (state.latency, state.fail_next_poll.take())
        };
        let store = self.clone();

        async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(KeyStoreError::Cancelled),
                () = tokio::time::sleep(latency) => {},
            }
            if let Some(error) = failure {
                return Err(error);
            }

            let published = {
                let mut state = store.state();
                let staged: Vec<_> = state.staged.drain().collect();
                let published = !staged.is_empty();
                state.keys.extend(staged);
                published
            };
            if published {
                store.notify();
            }
            Ok(())
        }
    }

    fn key_updates(&self) -> broadcast::Receiver<()> {
        self.updates.subscribe()
    }
}

/// Removes a query from the live set once it finishes or is dropped.
#[derive(Debug)]
struct LiveQuery {
    store: SimKeyStore,
    id: usize,
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.store.state().live.retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use keyring_core::Grant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn query_returns_user_keys() {
        let store = SimKeyStore::with_keys("alice", vec![LockKey::new(Grant::unlimited("a", "A"))]);

        let keys = store.query_local_keys(&"alice".into(), CancellationToken::new()).await;
        let none = store.query_local_keys(&"bob".into(), CancellationToken::new()).await;

        assert_eq!(keys.map(|k| k.len()), Ok(1));
        assert_eq!(none, Ok(vec![]));
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_query_reports_cancellation() {
        let store = SimKeyStore::new();
        store.set_latency(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.query_local_keys(&"alice".into(), cancel).await;

        assert_eq!(result, Err(KeyStoreError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn live_queries_exclude_cancelled_and_finished() {
        let store = SimKeyStore::new();
        store.set_latency(Duration::from_secs(1));
        let first = CancellationToken::new();
        let alice: UserId = "alice".into();
        let bob: UserId = "bob".into();
        let pending = store.query_local_keys(&alice, first.clone());
        first.cancel();
        let second = store.query_local_keys(&bob, CancellationToken::new());
        assert_eq!(store.max_live_queries(), 1);

        let third = store.query_local_keys(&bob, CancellationToken::new());
        assert_eq!(store.max_live_queries(), 2);

        drop(pending);
        let (second, third) = tokio::join!(second, third);
        assert_eq!((second, third), (Ok(vec![]), Ok(vec![])));

        let fourth = store.query_local_keys(&"bob".into(), CancellationToken::new()).await;
        assert_eq!(fourth, Ok(vec![]));
        assert_eq!(store.max_live_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_publishes_staged_keys() {
        let store = SimKeyStore::new();
        let mut updates = store.key_updates();
        store.stage_for_poll("alice", vec![LockKey::new(Grant::unlimited("a", "A"))]);

        store.poll_notifications(CancellationToken::new()).await.unwrap();

        assert!(updates.try_recv().is_ok());
        let keys = store.query_local_keys(&"alice".into(), CancellationToken::new()).await;
        assert_eq!(keys.map(|k| k.len()), Ok(1));
    }
}

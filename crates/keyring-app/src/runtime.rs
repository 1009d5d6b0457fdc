//! Generic runtime for keyring orchestration.
//!
//! The Runtime drives the keyring event loop, coordinating between:
//! - [`Keyring`]: orchestration state machine
//! - [`KeyStore`], [`LockScanner`], [`LockCommunicator`]: platform I/O
//! - [`KeyringHandle`]: the application shell and its observers
//!
//! The loop owns all keyring state. Asynchronous work (key queries, command
//! operations, collaborator notifications) runs in spawned tasks that report
//! back over a channel, so state is only ever touched from the loop. Every
//! task holds a child of the runtime's [`CancellationToken`]; shutting down
//! cancels all of them.

use std::{collections::HashMap, sync::Arc, time::Duration};

use keyring_core::{
    BleAddress, CommandOutcome, CommandSpec, CommunicatorError, KeyStoreError, OperationId,
    RosterView, UserId, env::Environment,
};
use thiserror::Error;
use tokio::sync::{
    broadcast::{self, error::RecvError, error::TryRecvError},
    mpsc, oneshot, watch,
};
use tokio_util::sync::CancellationToken;

use crate::{
    AdapterState, BluetoothWarning, KeyStore, Keyring, KeyringAction, KeyringConfig, KeyringEvent,
    KeyringNotification, LockCommunicator, LockScanner, QueryId,
};

/// Notifications buffered per subscriber before it starts lagging.
const NOTIFICATION_CAPACITY: usize = 256;

/// Errors returned through a [`KeyringHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime has shut down.
    #[error("keyring runtime has shut down")]
    Closed,

    /// The key store rejected a request.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

#[derive(Debug)]
enum Request {
    Event(KeyringEvent),
    PollForNewKeys(oneshot::Sender<Result<(), KeyStoreError>>),
}

/// Generic runtime that drives a [`Keyring`] against platform collaborators.
///
/// # Type Parameters
///
/// - `K`: key store
/// - `S`: BLE scanner, also the presence source
/// - `C`: lock communicator
/// - `E`: environment providing time
pub struct Runtime<K, S, C, E>
where
    K: KeyStore,
    S: LockScanner,
    C: LockCommunicator,
    E: Environment,
{
    keyring: Keyring<E::Instant>,
    key_store: Arc<K>,
    scanner: Arc<S>,
    communicator: Arc<C>,
    env: E,

    requests_tx: mpsc::UnboundedSender<Request>,
    requests: mpsc::UnboundedReceiver<Request>,
    notifications: broadcast::Sender<KeyringNotification>,
    view: watch::Sender<RosterView>,
    warning: watch::Sender<Option<BluetoothWarning>>,

    /// Cancellation for in-flight command operations.
    commands: HashMap<(String, OperationId), CancellationToken>,
    /// Cancellation for the outstanding key query.
    key_query: Option<(QueryId, CancellationToken)>,
    observers: Option<CancellationToken>,
    scan: Option<S::Registration>,
    shutdown: CancellationToken,
}

impl<K, S, C, E> Runtime<K, S, C, E>
where
    K: KeyStore,
    S: LockScanner,
    C: LockCommunicator,
    E: Environment,
{
    /// Create a runtime. Nothing happens until [`Runtime::run`] is polled and
    /// the app reports that it is in the foreground.
    pub fn new(config: KeyringConfig, key_store: K, scanner: S, communicator: C, env: E) -> Self {
        let keyring = Keyring::new(config);
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (view, _) = watch::channel(keyring.view().clone());
        let (warning, _) = watch::channel(keyring.bluetooth_warning());

        Self {
            keyring,
            key_store: Arc::new(key_store),
            scanner: Arc::new(scanner),
            communicator: Arc::new(communicator),
            env,
            requests_tx,
            requests,
            notifications,
            view,
            warning,
            commands: HashMap::new(),
            key_query: None,
            observers: None,
            scan: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle for the application shell and observers.
    pub fn handle(&self) -> KeyringHandle {
        KeyringHandle {
            requests: self.requests_tx.clone(),
            notifications: self.notifications.clone(),
            view: self.view.subscribe(),
            warning: self.warning.subscribe(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Get a reference to the Keyring.
    pub fn keyring(&self) -> &Keyring<E::Instant> {
        &self.keyring
    }

    /// Run the event loop until [`KeyringHandle::shutdown`] is called.
    ///
    /// On exit every outstanding operation is cancelled, the scan registration
    /// is released and observers are closed.
    pub async fn run(mut self) {
        tracing::info!("keyring runtime started");
        let shutdown = self.shutdown.clone();
        let env = self.env.clone();

        loop {
            let due = self.keyring.next_due(env.now());
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(request) = self.requests.recv() => self.handle_request(request),
                () = sleep_until_due(&env, due) => self.dispatch(KeyringEvent::Tick),
            }
        }

        self.teardown();
        tracing::info!("keyring runtime stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Event(event) => self.dispatch(event),
            Request::PollForNewKeys(reply) => self.poll_for_new_keys(reply),
        }
    }

    fn dispatch(&mut self, event: KeyringEvent) {
        match &event {
            KeyringEvent::KeysLoaded { query, .. } => {
                if self.key_query.as_ref().is_some_and(|(current, _)| current == query) {
                    self.key_query = None;
                }
            },
            KeyringEvent::CommandCompleted { lock_id, op, .. } => {
                self.commands.remove(&(lock_id.clone(), *op));
            },
            _ => {},
        }

        let now = self.env.now();
        let actions = self.keyring.handle(event, &*self.scanner, now);
        self.publish();
        self.execute(actions);
    }

    /// Execute actions returned by the Keyring.
    fn execute(&mut self, actions: Vec<KeyringAction>) {
        for action in actions {
            match action {
                KeyringAction::Observe => self.observe(),
                KeyringAction::StopObserving => {
                    if let Some(token) = self.observers.take() {
                        token.cancel();
                        tracing::debug!("observers closed");
                    }
                },
                KeyringAction::QueryKeys { query, user_id } => self.query_keys(query, user_id),
                KeyringAction::CancelQuery { query } => match self.key_query.take() {
                    Some((current, token)) if current == query => {
                        token.cancel();
                        tracing::debug!(%query, "key query cancelled");
                    },
                    other => self.key_query = other,
                },
                KeyringAction::StartScan => {
                    if self.scan.is_none() {
                        self.scan = Some(self.scanner.start_scan());
                        tracing::info!("scan started");
                    }
                },
                KeyringAction::StopScan => {
                    if self.scan.take().is_some() {
                        tracing::info!("scan stopped");
                    }
                },
                KeyringAction::Execute { lock_id, op, address, command, timeout } => {
                    self.execute_command(lock_id, op, address, command, timeout);
                },
                KeyringAction::Cancel { lock_id, op } => {
                    if let Some(token) = self.commands.remove(&(lock_id, op)) {
                        token.cancel();
                    }
                },
                KeyringAction::Notify(notification) => {
                    // Sending only fails without subscribers.
                    let _ = self.notifications.send(notification);
                },
            }
        }
    }

    fn observe(&mut self) {
        if let Some(stale) = self.observers.take() {
            stale.cancel();
        }
        let token = self.shutdown.child_token();
        forward(
            self.key_store.key_updates(),
            KeyringEvent::KeysChanged,
            self.requests_tx.clone(),
            token.clone(),
        );
        forward(
            self.scanner.scan_updates(),
            KeyringEvent::ScanResultsChanged,
            self.requests_tx.clone(),
            token.clone(),
        );
        self.observers = Some(token);
        tracing::debug!("observers registered");
    }

    fn query_keys(&mut self, query: QueryId, user_id: UserId) {
        let token = self.shutdown.child_token();
        if let Some((stale, stale_token)) = self.key_query.replace((query, token.clone())) {
            tracing::debug!(query = %stale, "replacing stale key query");
            stale_token.cancel();
        }

        let store = Arc::clone(&self.key_store);
        let tx = self.requests_tx.clone();
        tracing::debug!(%query, %user_id, "querying local keys");

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => Err(KeyStoreError::Cancelled),
                result = store.query_local_keys(&user_id, token.clone()) => result,
            };
            let _ = tx.send(Request::Event(KeyringEvent::KeysLoaded { query, result }));
        });
    }

    fn execute_command(
        &mut self,
        lock_id: String,
        op: OperationId,
        address: BleAddress,
        command: CommandSpec,
        timeout: Duration,
    ) {
        let token = self.shutdown.child_token();
        self.commands.insert((lock_id.clone(), op), token.clone());

        let communicator = Arc::clone(&self.communicator);
        let tx = self.requests_tx.clone();
        tracing::debug!(%lock_id, %op, %address, "executing command");

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => CommandOutcome::Cancelled,
                result = communicator.execute_command(&address, &lock_id, command, token.clone(), timeout) => {
                    match result {
                        Ok(code) => CommandOutcome::Completed(code),
                        Err(CommunicatorError::Cancelled) => CommandOutcome::Cancelled,
                        Err(error) => CommandOutcome::Failed(error.to_string()),
                    }
                },
            };
            let _ = tx.send(Request::Event(KeyringEvent::CommandCompleted { lock_id, op, outcome }));
        });
    }

    fn poll_for_new_keys(&self, reply: oneshot::Sender<Result<(), KeyStoreError>>) {
        let token = self.shutdown.child_token();
        let store = Arc::clone(&self.key_store);

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => Err(KeyStoreError::Cancelled),
                result = store.poll_notifications(token.clone()) => result,
            };
            if let Err(error) = &result {
                tracing::warn!(%error, "failed to poll for new keys");
            }
            let _ = reply.send(result);
        });
    }

    /// Push the current view and warning to watchers, if they changed.
    fn publish(&self) {
        let view = self.keyring.view();
        self.view.send_if_modified(|current| {
            if current == view {
                return false;
            }
            current.clone_from(view);
            true
        });

        let warning = self.keyring.bluetooth_warning();
        self.warning.send_if_modified(|current| {
            if *current == warning {
                return false;
            }
            *current = warning;
            true
        });
    }

    fn teardown(&mut self) {
        let actions = self.keyring.teardown();
        self.execute(actions);

        for (_, token) in self.commands.drain() {
            token.cancel();
        }
        if let Some((_, token)) = self.key_query.take() {
            token.cancel();
        }
        if let Some(token) = self.observers.take() {
            token.cancel();
        }
        self.scan = None;
        self.shutdown.cancel();
    }
}

async fn sleep_until_due<E: Environment>(env: &E, due: Option<Duration>) {
    match due {
        Some(duration) => env.sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Turn collaborator change notifications into keyring events until `token`
/// is cancelled.
fn forward(
    mut updates: broadcast::Receiver<()>,
    event: KeyringEvent,
    tx: mpsc::UnboundedSender<Request>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let update = tokio::select! {
                biased;
                () = token.cancelled() => break,
                update = updates.recv() => update,
            };
            match update {
                // A lagged receiver still means something changed.
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    if tx.send(Request::Event(event.clone())).is_err() {
                        break;
                    }
                },
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Cloneable handle to a running keyring.
///
/// All methods are fire-and-forget except [`KeyringHandle::poll_for_new_keys`].
/// They fail with [`RuntimeError::Closed`] once the runtime has stopped.
#[derive(Debug, Clone)]
pub struct KeyringHandle {
    requests: mpsc::UnboundedSender<Request>,
    notifications: broadcast::Sender<KeyringNotification>,
    view: watch::Receiver<RosterView>,
    warning: watch::Receiver<Option<BluetoothWarning>>,
    shutdown: CancellationToken,
}

impl KeyringHandle {
    /// Ask to open a lock.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the runtime has stopped.
    pub fn trigger(&self, lock_id: impl Into<String>) -> Result<(), RuntimeError> {
        self.send(KeyringEvent::Trigger { lock_id: lock_id.into() })
    }

    /// Re-query the key store.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the runtime has stopped.
    pub fn refresh_keys(&self) -> Result<(), RuntimeError> {
        self.send(KeyringEvent::RefreshKeys)
    }

    /// Report that the app entered the foreground.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the runtime has stopped.
    pub fn on_foreground(&self) -> Result<(), RuntimeError> {
        self.send(KeyringEvent::Foreground)
    }

    /// Report that the app entered the background.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the runtime has stopped.
    pub fn on_background(&self) -> Result<(), RuntimeError> {
        self.send(KeyringEvent::Background)
    }

    /// Report a Bluetooth adapter state change.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the runtime has stopped.
    pub fn adapter_changed(&self, adapter: AdapterState) -> Result<(), RuntimeError> {
        self.send(KeyringEvent::AdapterChanged(adapter))
    }

    /// Report a sign-in or sign-out.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the runtime has stopped.
    pub fn set_active_user(&self, user_id: Option<UserId>) -> Result<(), RuntimeError> {
        self.send(KeyringEvent::ActiveUserChanged(user_id))
    }

    /// Ask the backend for new keys and wait for the poll to finish.
    ///
    /// New keys reach the roster through the key store's change
    /// notifications, possibly after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::KeyStore`] if the poll failed, or
    /// [`RuntimeError::Closed`] if the runtime stopped first.
    pub async fn poll_for_new_keys(&self) -> Result<(), RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.requests.send(Request::PollForNewKeys(reply)).map_err(|_| RuntimeError::Closed)?;
        let result = response.await.map_err(|_| RuntimeError::Closed)?;
        result.map_err(RuntimeError::from)
    }

    /// Subscribe to keyring notifications.
    pub fn subscribe(&self) -> Subscription {
        Subscription { receiver: self.notifications.subscribe() }
    }

    /// Watch the roster view.
    pub fn view(&self) -> watch::Receiver<RosterView> {
        self.view.clone()
    }

    /// Watch the Bluetooth warning.
    pub fn bluetooth_warning(&self) -> watch::Receiver<Option<BluetoothWarning>> {
        self.warning.clone()
    }

    /// Stop the runtime.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// True once the runtime has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    fn send(&self, event: KeyringEvent) -> Result<(), RuntimeError> {
        self.requests.send(Request::Event(event)).map_err(|_| RuntimeError::Closed)
    }
}

/// Notification subscription. Dropping or closing it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<KeyringNotification>,
}

impl Subscription {
    /// Wait for the next notification. `None` once no sender remains.
    ///
    /// A subscriber that falls behind skips the oldest notifications.
    pub async fn recv(&mut self) -> Option<KeyringNotification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, notifications dropped");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered notification, if any.
    pub fn try_recv(&mut self) -> Option<KeyringNotification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, notifications dropped");
                },
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Unsubscribe.
    pub fn close(self) {
        drop(self.receiver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_subscription_unsubscribes() {
        let (sender, _) = broadcast::channel(4);
        let subscription = Subscription { receiver: sender.subscribe() };
        assert_eq!(sender.receiver_count(), 1);

        subscription.close();

        assert_eq!(sender.receiver_count(), 0);
        assert!(sender.send(KeyringNotification::RosterUpdated).is_err());
    }
}

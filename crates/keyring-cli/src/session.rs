//! Scripted keyring session against the simulated collaborators.
//!
//! The session signs a user in, brings the keyring to the foreground with a
//! ready adapter, triggers locks, waits until every triggered lock has
//! reverted to idle, then backgrounds and shuts down. Everything observable
//! is reported through `tracing`.

use std::{collections::BTreeSet, time::Duration};

use keyring_app::{
    AdapterState, KeyringConfig, KeyringNotification, Runtime, RuntimeError, SystemEnv,
};
use keyring_core::{CommandResultCode, LockKey, RosterItem, RosterView};
use keyring_harness::{SimCommunicator, SimKeyStore, SimScanner, Step};
use thiserror::Error;
use tokio::sync::watch;

/// Default bound on waiting for the roster or for locks to settle.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Session errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Runtime stopped while the session still needed it.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A step did not finish in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Runtime task panicked or was aborted.
    #[error("runtime task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Session script.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signed-in user.
    pub user: String,
    /// Keys the key store holds for the user.
    pub keys: Vec<LockKey>,
    /// Locks in range.
    pub nearby: Vec<String>,
    /// Result code returned for a lock's first command; others succeed.
    pub failures: Vec<(String, CommandResultCode)>,
    /// Simulated BLE latency per command.
    pub latency: Duration,
    /// Locks to trigger. Empty triggers every nearby lock.
    pub triggers: Vec<String>,
    /// Bound on each wait.
    pub settle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user: "demo".to_string(),
            keys: Vec::new(),
            nearby: Vec::new(),
            failures: Vec::new(),
            latency: Duration::from_millis(300),
            triggers: Vec::new(),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}

/// What a finished session observed.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Roster after the first reconciliation.
    pub initial: RosterView,
    /// Every notification received, in order.
    pub notifications: Vec<KeyringNotification>,
    /// Roster once all triggered locks were idle again.
    pub settled: RosterView,
    /// Commands the communicator executed.
    pub commands_sent: usize,
}

/// Run a session to completion.
pub async fn run(config: SessionConfig) -> Result<SessionReport, SessionError> {
    let store = SimKeyStore::with_keys(config.user.as_str(), config.keys.clone());
    let nearby: Vec<&str> = config.nearby.iter().map(String::as_str).collect();
    let scanner = SimScanner::with_nearby(&nearby);
    let communicator = SimCommunicator::new();
    communicator.set_latency(config.latency);
    for (lock_id, code) in &config.failures {
        communicator.script(lock_id, [Step::Respond(*code)]);
    }

    let runtime = Runtime::new(
        KeyringConfig::for_user(config.user.as_str()),
        store,
        scanner,
        communicator.clone(),
        SystemEnv::new(),
    );
    let handle = runtime.handle();
    let mut subscription = handle.subscribe();
    let mut view = handle.view();
    let task = tokio::spawn(runtime.run());

    tracing::info!(user = %config.user, keys = config.keys.len(), "session starting");
    handle.adapter_changed(AdapterState::READY)?;
    handle.on_foreground()?;

    let initial = wait_reconciled(&mut view, config.settle_timeout).await?;
    log_roster("initial", &initial);
    if let Some(warning) = *handle.bluetooth_warning().borrow() {
        tracing::warn!(?warning, "bluetooth unavailable");
    }

    let mut pending = BTreeSet::new();
    for lock_id in select_triggers(&config.triggers, &initial) {
        handle.trigger(lock_id.as_str())?;
        pending.insert(lock_id);
    }

    let mut notifications = Vec::new();
    let settle = async {
        while !pending.is_empty() {
            let Some(notification) = subscription.recv().await else {
                return Err(SessionError::Runtime(RuntimeError::Closed));
            };
            log_notification(&notification, &view.borrow());
            if let KeyringNotification::LockReturnedToIdle { lock_id } = &notification {
                pending.remove(lock_id);
            }
            notifications.push(notification);
        }
        Ok(())
    };
    tokio::time::timeout(config.settle_timeout, settle)
        .await
        .map_err(|_| SessionError::Timeout("locks to return to idle"))??;

    let settled = view.borrow().clone();
    log_roster("settled", &settled);

    handle.on_background()?;
    handle.shutdown();
    task.await?;
    tracing::info!(commands = communicator.executed().len(), "session finished");

    Ok(SessionReport {
        initial,
        notifications,
        settled,
        commands_sent: communicator.executed().len(),
    })
}

async fn wait_reconciled(
    view: &mut watch::Receiver<RosterView>,
    timeout: Duration,
) -> Result<RosterView, SessionError> {
    let reconciled = tokio::time::timeout(timeout, view.wait_for(RosterView::is_reconciled))
        .await
        .map_err(|_| SessionError::Timeout("first reconciliation"))?
        .map_err(|_| RuntimeError::Closed)?;
    Ok(reconciled.clone())
}

/// Requested locks that can be triggered, or every nearby lock.
///
/// Triggering a lock out of range does nothing, so it would never settle.
fn select_triggers(requested: &[String], view: &RosterView) -> Vec<String> {
    let nearby = view.nearby_ids();
    if requested.is_empty() {
        return nearby.into_iter().map(str::to_string).collect();
    }

    requested
        .iter()
        .filter(|lock_id| {
            let in_range = nearby.contains(&lock_id.as_str());
            if !in_range {
                tracing::warn!(%lock_id, "not nearby, skipping trigger");
            }
            in_range
        })
        .cloned()
        .collect()
}

fn log_roster(label: &str, view: &RosterView) {
    tracing::info!(label, sections = view.visible_sections(), "roster");
    for (section, items) in [("nearby", &view.nearby), ("other", &view.other)] {
        for item in items {
            match item {
                RosterItem::Lock(lock) => tracing::info!(
                    section,
                    lock_id = %lock.physical_lock_id,
                    title = %lock.title,
                    state = ?lock.state,
                    unlimited = lock.unlimited_validity,
                    offline_from = lock.offline_from.as_deref().unwrap_or("-"),
                    offline_until = lock.offline_until.as_deref().unwrap_or("-"),
                ),
                RosterItem::Placeholder => tracing::info!(section, "no locks nearby"),
            }
        }
    }
}

fn log_notification(notification: &KeyringNotification, view: &RosterView) {
    match notification {
        KeyringNotification::LockStateChanged { lock_id, state } => {
            let message = view.find(lock_id).and_then(|lock| lock.error_message.as_deref());
            match message {
                Some(message) => tracing::warn!(%lock_id, ?state, message, "lock state changed"),
                None => tracing::info!(%lock_id, ?state, "lock state changed"),
            }
        },
        KeyringNotification::LockReturnedToIdle { lock_id } => {
            tracing::info!(%lock_id, "lock idle");
        },
        other => tracing::debug!(notification = ?other),
    }
}

#[cfg(test)]
mod tests {
    use keyring_core::{Grant, LockState};

    use super::*;

    fn config(nearby: &[&str]) -> SessionConfig {
        SessionConfig {
            keys: vec![
                LockKey::new(Grant::unlimited("front", "Front Door")),
                LockKey::new(Grant::unlimited("garage", "Garage")),
                LockKey::new(Grant::unlimited("cellar", "Cellar")),
            ],
            nearby: nearby.iter().map(|id| id.to_string()).collect(),
            ..SessionConfig::default()
        }
    }

    fn states_of(report: &SessionReport, lock_id: &str) -> Vec<LockState> {
        report
            .notifications
            .iter()
            .filter_map(|n| match n {
                KeyringNotification::LockStateChanged { lock_id: id, state } if id == lock_id => {
                    Some(*state)
                },
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn session_triggers_every_nearby_lock() {
        let report = run(config(&["front", "garage"])).await.unwrap();

        assert_eq!(report.initial.nearby_ids(), vec!["front", "garage"]);
        assert_eq!(report.initial.other_ids(), vec!["cellar"]);
        assert_eq!(report.commands_sent, 2);
        for lock_id in ["front", "garage"] {
            assert_eq!(states_of(&report, lock_id), vec![
                LockState::InProgress,
                LockState::Succeeded,
                LockState::Idle
            ]);
        }
        assert!(report.settled.find("front").is_some_and(|lock| lock.state == LockState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_failure_surfaces_then_settles() {
        let mut config = config(&["front"]);
        config.failures = vec![("front".to_string(), CommandResultCode::TechnicalError)];

        let report = run(config).await.unwrap();

        assert_eq!(states_of(&report, "front"), vec![
            LockState::InProgress,
            LockState::Failed,
            LockState::Idle
        ]);
        let front = report.settled.find("front").unwrap();
        assert_eq!(front.state, LockState::Idle);
        assert!(front.error_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_triggers_are_skipped() {
        let mut config = config(&["front"]);
        config.triggers = vec!["cellar".to_string(), "front".to_string()];

        let report = run(config).await.unwrap();

        assert_eq!(report.commands_sent, 1);
        assert!(states_of(&report, "cellar").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_nearby_finishes_without_commands() {
        let report = run(config(&[])).await.unwrap();

        assert_eq!(report.initial.nearby, vec![RosterItem::Placeholder]);
        assert_eq!(report.commands_sent, 0);
        assert!(report.notifications.is_empty());
    }
}

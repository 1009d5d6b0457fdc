//! Property-based tests for the Keyring state machine.
//!
//! Tests verify that roster invariants hold under arbitrary sequences of
//! lifecycle events, user changes, key query results, presence changes,
//! triggers, outcomes and elapsed time. This ensures behavioral correctness across all possible
//! execution paths.

use std::time::{Duration, Instant};

use keyring_app::{AdapterState, Keyring, KeyringAction, KeyringConfig, KeyringEvent, QueryId};
use keyring_core::{
    CommandOutcome, CommandResultCode, Grant, LockKey, LockState, OperationId, UserId,
};
use keyring_harness::{InvariantRegistry, KeyringSnapshot, SimScanner};
use proptest::prelude::*;

/// Lock pool: ids with titles that collide and differ only in case.
const LOCKS: [(&str, &str); 5] =
    [("a", "attic"), ("b", "Attic"), ("c", "Balcony"), ("d", "Attic"), ("e", "Cellar")];

/// Users the active user switches between.
const USERS: [&str; 2] = ["alice", "bob"];

#[derive(Debug, Clone)]
enum Op {
    Foreground,
    Background,
    Refresh,
    /// Result for the outstanding query, or for an older one when `stale`.
    LoadKeys { indices: Vec<usize>, stale: bool },
    ChangeUser(Option<usize>),
    SetNearby(Vec<usize>),
    Adapter(bool, bool),
    Trigger(usize),
    Complete { lock: usize, code: usize, stale: bool },
    Advance(u64),
}

fn indices() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..LOCKS.len(), 0..7)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Foreground),
        1 => Just(Op::Background),
        1 => Just(Op::Refresh),
        3 => (indices(), any::<bool>()).prop_map(|(indices, stale)| Op::LoadKeys { indices, stale }),
        1 => prop::option::of(0..USERS.len()).prop_map(Op::ChangeUser),
        3 => indices().prop_map(Op::SetNearby),
        1 => (any::<bool>(), any::<bool>()).prop_map(|(p, a)| Op::Adapter(p, a)),
        4 => (0..LOCKS.len()).prop_map(Op::Trigger),
        3 => (0..LOCKS.len(), 0..CommandResultCode::ALL.len(), any::<bool>())
            .prop_map(|(lock, code, stale)| Op::Complete { lock, code, stale }),
        4 => (0u64..6_000).prop_map(Op::Advance),
    ]
}

fn keys(indices: &[usize]) -> Vec<LockKey> {
    indices
        .iter()
        .map(|&i| {
            let (id, title) = LOCKS[i];
            LockKey::new(Grant::unlimited(id, title))
        })
        .collect()
}

fn nearby_ids(indices: &[usize]) -> Vec<&'static str> {
    indices.iter().map(|&i| LOCKS[i].0).collect()
}

struct Sim {
    keyring: Keyring,
    scanner: SimScanner,
    now: Instant,
    /// Every query the keyring issued, oldest first.
    issued: Vec<QueryId>,
    /// Active user as the shell last reported it.
    user: Option<UserId>,
    /// Keys the roster should hold: the last result for the active user.
    expected_keys: Vec<LockKey>,
}

impl Sim {
    fn new() -> Self {
        Self {
            keyring: Keyring::new(KeyringConfig::for_user("alice")),
            scanner: SimScanner::new(),
            now: Instant::now(),
            issued: Vec::new(),
            user: Some(UserId::from("alice")),
            expected_keys: Vec::new(),
        }
    }

    fn handle(&mut self, event: KeyringEvent) -> Vec<KeyringAction> {
        let actions = self.keyring.handle(event, &self.scanner, self.now);
        self.issued.extend(actions.iter().filter_map(|action| match action {
            KeyringAction::QueryKeys { query, .. } => Some(*query),
            _ => None,
        }));
        actions
    }

    /// Query id that is not the outstanding one.
    fn stale_query(&self) -> QueryId {
        let outstanding = self.keyring.outstanding_query();
        self.issued.iter().rev().copied().find(|q| Some(*q) != outstanding).unwrap_or(QueryId(0))
    }

    fn apply(&mut self, op: &Op) -> Vec<KeyringAction> {
        match op {
            Op::Foreground => self.handle(KeyringEvent::Foreground),
            Op::Background => self.handle(KeyringEvent::Background),
            Op::Refresh => self.handle(KeyringEvent::RefreshKeys),
            Op::LoadKeys { indices, stale } => {
                let query = match self.keyring.outstanding_query() {
                    Some(query) if !stale => {
                        self.expected_keys = keys(indices);
                        query
                    },
                    _ => self.stale_query(),
                };
                self.handle(KeyringEvent::KeysLoaded { query, result: Ok(keys(indices)) })
            },
            Op::ChangeUser(user) => {
                let user = user.map(|i| UserId::from(USERS[i]));
                if user != self.user {
                    self.user.clone_from(&user);
                    self.expected_keys.clear();
                }
                self.handle(KeyringEvent::ActiveUserChanged(user))
            },
            Op::SetNearby(indices) => {
                self.scanner.set_nearby(&nearby_ids(indices));
                self.handle(KeyringEvent::ScanResultsChanged)
            },
            Op::Adapter(powered_on, authorized) => self.handle(KeyringEvent::AdapterChanged(
                AdapterState { powered_on: *powered_on, authorized: *authorized },
            )),
            Op::Trigger(lock) => {
                self.handle(KeyringEvent::Trigger { lock_id: LOCKS[*lock].0.to_string() })
            },
            Op::Complete { lock, code, stale } => {
                let lock_id = LOCKS[*lock].0;
                let outstanding =
                    self.keyring.roster().entry(lock_id).and_then(|e| e.outstanding_op());
                let op = match (outstanding, stale) {
                    (Some(op), false) => op,
                    (Some(op), true) => OperationId(op.0 + 1_000),
                    (None, _) => OperationId(0),
                };
                self.handle(KeyringEvent::CommandCompleted {
                    lock_id: lock_id.to_string(),
                    op,
                    outcome: CommandOutcome::Completed(CommandResultCode::ALL[*code]),
                })
            },
            Op::Advance(ms) => {
                self.now += Duration::from_millis(*ms);
                self.handle(KeyringEvent::Tick)
            },
        }
    }

    fn snapshot(&self) -> KeyringSnapshot {
        KeyringSnapshot::from_keyring(&self.keyring)
    }
}

proptest! {
    /// Roster invariants hold under arbitrary event sequences.
    #[test]
    fn prop_roster_invariants_hold(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut sim = Sim::new();
        let invariants = InvariantRegistry::standard();

        for op in ops {
            let _ = sim.apply(&op);

            let snapshot = sim.snapshot();
            prop_assert!(
                invariants.check_all(&snapshot).is_ok(),
                "Invariant violated after {:?}: {:?}", op, invariants.check_all(&snapshot)
            );
        }
    }

    /// A lock never has two operations outstanding.
    ///
    /// An Execute is only issued when the lock was not already in progress.
    #[test]
    fn prop_single_operation_per_lock(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut sim = Sim::new();

        for op in ops {
            let before: Vec<_> =
                LOCKS.iter().map(|(id, _)| sim.keyring.lock_state(id)).collect();
            let actions = sim.apply(&op);

            for action in &actions {
                if let KeyringAction::Execute { lock_id, .. } = action {
                    let index = LOCKS.iter().position(|(id, _)| id == lock_id).unwrap();
                    prop_assert_ne!(before[index], Some(LockState::InProgress));
                }
            }
        }
    }

    /// Outcomes carrying a stale operation id never change state.
    #[test]
    fn prop_stale_outcomes_are_ignored(
        ops in prop::collection::vec(op_strategy(), 0..40),
        lock in 0..LOCKS.len(),
        code in 0..CommandResultCode::ALL.len(),
    ) {
        let mut sim = Sim::new();
        for op in &ops {
            let _ = sim.apply(op);
        }

        let lock_id = LOCKS[lock].0;
        let before = sim.keyring.lock_state(lock_id);
        let view_before = sim.keyring.view().clone();
        let actions = sim.apply(&Op::Complete { lock, code, stale: true });

        prop_assert!(actions.is_empty());
        prop_assert_eq!(sim.keyring.lock_state(lock_id), before);
        prop_assert_eq!(sim.keyring.view(), &view_before);
    }

    /// A scan registration is only held while observing with keys present.
    #[test]
    fn prop_scan_requires_observing_and_keys(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut sim = Sim::new();

        for op in ops {
            let _ = sim.apply(&op);
            if sim.keyring.is_scanning() {
                prop_assert!(sim.keyring.is_observing(), "scanning in background after {:?}", op);
                prop_assert!(sim.keyring.should_scan(), "scanning without keys after {:?}", op);
            }
        }
    }

    /// The roster never holds more entries than distinct keyed locks plus
    /// busy orphans, and every entry is reachable from the view.
    #[test]
    fn prop_idle_orphans_are_dropped(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut sim = Sim::new();

        for op in ops {
            let _ = sim.apply(&op);

            let keyed: Vec<_> =
                sim.keyring.roster().keys().iter().filter_map(LockKey::physical_lock_id).collect();
            for entry in sim.keyring.roster().entries() {
                prop_assert!(
                    keyed.contains(&entry.physical_lock_id()) || !entry.is_idle(),
                    "idle orphan {} kept after {:?}", entry.physical_lock_id(), op
                );
            }
        }
    }

    /// The roster only ever holds the keys of the active user's latest query.
    #[test]
    fn prop_keys_belong_to_active_user(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut sim = Sim::new();

        for op in ops {
            let _ = sim.apply(&op);
            prop_assert_eq!(sim.keyring.roster().keys(), sim.expected_keys.as_slice(), "after {:?}", op);
            if sim.user.is_none() {
                prop_assert!(!sim.keyring.should_scan(), "scan wanted without a user after {:?}", op);
            }
        }
    }

    /// At most one key query is outstanding, always for the active user, and
    /// only the outstanding query is ever cancelled.
    #[test]
    fn prop_single_key_query(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut sim = Sim::new();

        for op in ops {
            let mut live = sim.keyring.outstanding_query();
            let actions = sim.apply(&op);

            for action in &actions {
                match action {
                    KeyringAction::CancelQuery { query } => {
                        prop_assert_eq!(live, Some(*query), "cancelled a query not outstanding after {:?}", op);
                        live = None;
                    },
                    KeyringAction::QueryKeys { query, user_id } => {
                        prop_assert!(live.is_none(), "second query {} issued by {:?}", query, op);
                        prop_assert_eq!(Some(user_id), sim.user.as_ref());
                        live = Some(*query);
                    },
                    _ => {},
                }
            }
            if matches!(op, Op::LoadKeys { stale: false, .. }) {
                live = None;
            }
            prop_assert_eq!(live, sim.keyring.outstanding_query(), "after {:?}", op);
        }
    }

    /// Results for a query that is not outstanding never change anything.
    #[test]
    fn prop_stale_key_results_are_ignored(
        ops in prop::collection::vec(op_strategy(), 0..40),
        loaded in indices(),
    ) {
        let mut sim = Sim::new();
        for op in &ops {
            let _ = sim.apply(op);
        }

        let outstanding = sim.keyring.outstanding_query();
        let keys_before = sim.keyring.roster().keys().to_vec();
        let view_before = sim.keyring.view().clone();
        let actions = sim.apply(&Op::LoadKeys { indices: loaded, stale: true });

        prop_assert!(actions.is_empty());
        prop_assert_eq!(sim.keyring.outstanding_query(), outstanding);
        prop_assert_eq!(sim.keyring.roster().keys(), keys_before.as_slice());
        prop_assert_eq!(sim.keyring.view(), &view_before);
    }
}

#[test]
fn sign_in_after_sign_out_queries_new_user() {
    let mut sim = Sim::new();
    let _ = sim.apply(&Op::Foreground);
    let _ = sim.apply(&Op::LoadKeys { indices: vec![0], stale: false });
    let _ = sim.apply(&Op::ChangeUser(None));

    let actions = sim.apply(&Op::ChangeUser(Some(1)));

    assert_eq!(actions, vec![KeyringAction::QueryKeys {
        query: QueryId(2),
        user_id: UserId::from("bob"),
    }]);
}

#[test]
fn switch_during_query_discards_previous_user_result() {
    let mut sim = Sim::new();
    let _ = sim.apply(&Op::Foreground);
    let alice_query = sim.keyring.outstanding_query().expect("alice query");

    let switch = sim.apply(&Op::ChangeUser(Some(1)));
    let late = sim.handle(KeyringEvent::KeysLoaded { query: alice_query, result: Ok(keys(&[0, 1])) });

    assert_eq!(switch, vec![
        KeyringAction::CancelQuery { query: alice_query },
        KeyringAction::QueryKeys { query: QueryId(2), user_id: UserId::from("bob") },
    ]);
    assert!(late.is_empty());
    assert!(sim.keyring.roster().keys().is_empty());
    assert_eq!(sim.keyring.outstanding_query(), Some(QueryId(2)));
}

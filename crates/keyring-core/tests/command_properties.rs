//! Property-based tests for the lock command state machine and roster.
//!
//! These tests drive [`LockCommand`] with arbitrary sequences of triggers,
//! outcomes and elapsed time, and [`Roster`] with arbitrary key lists and
//! presence, and check the properties that must hold for ALL inputs.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use keyring_core::{
    BleAddress, CommandAction, CommandConfig, CommandOutcome, CommandResultCode, Grant,
    LockCommand, LockKey, LockState, OperationId, Presence, Roster, RosterItem,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Trigger { nearby: bool },
    Complete { code: usize, stale: bool },
    Error,
    Advance(u64),
}

fn arbitrary_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => any::<bool>().prop_map(|nearby| Step::Trigger { nearby }),
        3 => (0..CommandResultCode::ALL.len(), any::<bool>())
            .prop_map(|(code, stale)| Step::Complete { code, stale }),
        1 => Just(Step::Error),
        3 => (0u64..20_000).prop_map(Step::Advance),
    ]
}

fn command() -> LockCommand {
    let details = LockKey::new(Grant::unlimited("front", "Front Door"))
        .details(true)
        .expect("resolvable key");
    LockCommand::new(details, CommandConfig::default())
}

fn apply(command: &mut LockCommand, step: &Step, now: &mut Instant) -> Vec<CommandAction> {
    match step {
        Step::Trigger { nearby } => {
            let address = nearby.then(|| BleAddress("aa:bb".to_string()));
            command.trigger(address, *now)
        },
        Step::Complete { code, stale } => {
            let op = match (command.outstanding_op(), stale) {
                (Some(op), false) => op,
                (Some(op), true) => OperationId(op.0 + 100),
                (None, _) => OperationId(0),
            };
            command.handle_outcome(op, CommandOutcome::Completed(CommandResultCode::ALL[*code]), *now)
        },
        Step::Error => match command.outstanding_op() {
            Some(op) => command.handle_outcome(op, CommandOutcome::Failed("link lost".into()), *now),
            None => vec![],
        },
        Step::Advance(ms) => {
            *now += Duration::from_millis(*ms);
            command.tick(*now)
        },
    }
}

struct Nearby(HashSet<String>);

impl Presence for Nearby {
    fn is_nearby(&self, physical_lock_id: &str) -> bool {
        self.0.contains(physical_lock_id)
    }

    fn lookup_address(&self, physical_lock_id: &str) -> Option<BleAddress> {
        self.is_nearby(physical_lock_id).then(|| BleAddress(format!("addr-{physical_lock_id}")))
    }
}

const TITLES: [&str; 5] = ["attic", "Attic", "Balcony", "cellar", "Zoo"];

proptest! {
    /// At most one operation is outstanding, and only while in progress.
    #[test]
    fn prop_single_outstanding_operation(steps in prop::collection::vec(arbitrary_step(), 0..80)) {
        let mut command = command();
        let mut now = Instant::now();

        for step in &steps {
            let before = command.state();
            let actions = apply(&mut command, step, &mut now);

            let executes = actions.iter().filter(|a| matches!(a, CommandAction::Execute { .. })).count();
            prop_assert!(executes <= 1);
            if executes == 1 {
                prop_assert_ne!(before, LockState::InProgress, "second operation started by {:?}", step);
            }
            prop_assert_eq!(
                command.outstanding_op().is_some(),
                command.state() == LockState::InProgress
            );
        }
    }

    /// An error message is shown exactly while failed, and it matches the
    /// message table.
    #[test]
    fn prop_error_message_only_when_failed(steps in prop::collection::vec(arbitrary_step(), 0..80)) {
        let mut command = command();
        let mut now = Instant::now();

        for step in &steps {
            let _ = apply(&mut command, step, &mut now);
            prop_assert_eq!(command.error_message().is_some(), command.state() == LockState::Failed);
        }
    }

    /// Any completed code settles, then reverts to idle after exactly the
    /// outcome's display delay.
    #[test]
    fn prop_revert_after_exact_delay(code in 0..CommandResultCode::ALL.len()) {
        let code = CommandResultCode::ALL[code];
        let config = CommandConfig::default();
        let mut command = command();
        let start = Instant::now();

        let _ = command.trigger(Some(BleAddress("aa:bb".into())), start);
        let op = command.outstanding_op().expect("operation started");
        let _ = command.handle_outcome(op, CommandOutcome::Completed(code), start);

        let (state, delay) = if code.is_ok() {
            (LockState::Succeeded, config.success_display)
        } else {
            (LockState::Failed, config.error_display)
        };
        prop_assert_eq!(command.state(), state);

        let early = command.tick(start + delay - Duration::from_millis(1));
        prop_assert!(early.is_empty());
        prop_assert_eq!(command.state(), state);

        let actions = command.tick(start + delay);
        prop_assert_eq!(actions, vec![CommandAction::StateChanged(LockState::Idle), CommandAction::ReturnedToIdle]);
        prop_assert!(command.error_message().is_none());
    }

    /// Reconciled sections are sorted by title, hold each keyed lock once, and
    /// split exactly by presence when everything is idle.
    #[test]
    fn prop_reconcile_sections(
        keys in prop::collection::vec((0u8..8, 0..TITLES.len()), 0..12),
        nearby in prop::collection::hash_set(0u8..8, 0..8),
    ) {
        let mut roster: Roster = Roster::new(CommandConfig::default());
        roster.set_keys(
            keys.iter()
                .map(|(id, title)| LockKey::new(Grant::unlimited(format!("lock-{id}"), TITLES[*title])))
                .collect(),
        );
        let presence = Nearby(nearby.iter().map(|id| format!("lock-{id}")).collect());

        let view = roster.reconcile(&presence).clone();

        let keyed: HashSet<String> = keys.iter().map(|(id, _)| format!("lock-{id}")).collect();
        let mut shown: Vec<&str> = view.nearby_ids();
        shown.extend(view.other_ids());
        prop_assert_eq!(shown.len(), keyed.len());
        prop_assert_eq!(shown.iter().map(|id| id.to_string()).collect::<HashSet<_>>(), keyed);

        for section in [&view.nearby, &view.other] {
            let titles: Vec<&str> = section.iter().filter_map(RosterItem::lock).map(|l| l.title.as_str()).collect();
            prop_assert!(titles.windows(2).all(|pair| pair[0] <= pair[1]), "unsorted: {:?}", titles);
        }
        for id in view.nearby_ids() {
            prop_assert!(presence.is_nearby(id));
        }
        for id in view.other_ids() {
            prop_assert!(!presence.is_nearby(id));
        }
        prop_assert_eq!(view.nearby.contains(&RosterItem::Placeholder), view.nearby_ids().is_empty());
        prop_assert!(!view.other.contains(&RosterItem::Placeholder));
    }
}

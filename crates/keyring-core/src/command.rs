//! Per-lock command state machine.
//!
//! Governs one trigger command attempt at a time for one physical lock. Uses
//! the action pattern: methods take time as input and return actions for the
//! runtime to execute. The command timeout and the idle-revert delay are
//! deadlines checked by [`LockCommand::tick`], so the machine itself never
//! sleeps or spawns.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  trigger   ┌────────────┐     ok      ┌───────────┐
//! │ Idle │───────────>│ InProgress │────────────>│ Succeeded │
//! └──────┘            └────────────┘             └───────────┘
//!    ^                      │ other code/error/timeout │
//!    │                      ↓                          │
//!    │  5000 ms        ┌────────┐                      │
//!    ├─────────────────│ Failed │                      │
//!    │                 └────────┘                      │
//!    └─────────────────────────────────────────────────┘
//!                          2000 ms
//! ```
//!
//! A trigger arriving in `Succeeded` or `Failed` drops the pending revert and
//! starts a new `InProgress` cycle.

use std::{
    fmt,
    ops::Sub,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{BleAddress, CommandResultCode, LockDetails};

/// Upper bound for a single trigger command, including BLE connection setup.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Time a successful outcome stays visible before reverting to idle.
pub const DEFAULT_SUCCESS_DISPLAY: Duration = Duration::from_millis(2_000);

/// Time a failed outcome stays visible before reverting to idle.
pub const DEFAULT_ERROR_DISPLAY: Duration = Duration::from_millis(5_000);

/// Command state of one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LockState {
    /// No command running, no outcome displayed.
    Idle,
    /// Trigger command outstanding.
    InProgress,
    /// Last command succeeded; reverts to idle after the success delay.
    Succeeded,
    /// Last command failed; reverts to idle after the error delay.
    Failed,
}

impl LockState {
    /// True for [`LockState::Idle`].
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// Identifies one command operation issued by a [`LockCommand`].
///
/// Unique per state machine. Outcomes carrying any other id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Command to execute over the BLE connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandSpec {
    /// Default trigger-lock command (open).
    TriggerLock,
}

/// Result of an executed command operation, as marshalled back by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The communicator produced a result code.
    Completed(CommandResultCode),
    /// The operation raised an error instead of producing a code.
    Failed(String),
    /// The operation was cancelled before completing.
    Cancelled,
}

/// Actions returned by the command state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Start a command operation through the lock communicator.
    Execute {
        /// Operation id to report the outcome with.
        op: OperationId,
        /// Address looked up from the scanner at trigger time.
        address: BleAddress,
        /// Target lock.
        physical_lock_id: String,
        /// Command to run.
        command: CommandSpec,
        /// Bound passed on to the communicator.
        timeout: Duration,
    },

    /// Request cancellation of an outstanding operation.
    Cancel {
        /// Operation to cancel.
        op: OperationId,
    },

    /// State transition happened (observer refresh).
    StateChanged(LockState),

    /// State returned to idle; the owner may prune the entry.
    ReturnedToIdle,
}

/// Timing configuration for command execution and outcome display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    /// Bound for a single command operation.
    pub command_timeout: Duration,
    /// Idle-revert delay after success.
    pub success_display: Duration,
    /// Idle-revert delay after failure.
    pub error_display: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            success_display: DEFAULT_SUCCESS_DISPLAY,
            error_display: DEFAULT_ERROR_DISPLAY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending<I> {
    op: OperationId,
    started_at: I,
}

#[derive(Debug, Clone, Copy)]
struct IdleRevert<I> {
    since: I,
    delay: Duration,
}

/// Command state machine for one physical lock.
///
/// Pure state machine: no I/O, no clock. At most one outstanding operation and
/// at most one idle-revert deadline exist at any time; starting either replaces
/// the previous one.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct LockCommand<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    details: LockDetails,
    state: LockState,
    error_message: Option<String>,
    config: CommandConfig,
    pending: Option<Pending<I>>,
    revert: Option<IdleRevert<I>>,
    next_op: u64,
}

impl<I> LockCommand<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an idle state machine for the lock described by `details`.
    pub fn new(details: LockDetails, config: CommandConfig) -> Self {
        Self {
            details,
            state: LockState::Idle,
            error_message: None,
            config,
            pending: None,
            revert: None,
            next_op: 1,
        }
    }

    /// Current command state.
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Display message of the last failure. `None` unless [`LockState::Failed`].
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Current display data.
    pub fn details(&self) -> &LockDetails {
        &self.details
    }

    /// Stable lock identifier.
    pub fn physical_lock_id(&self) -> &str {
        &self.details.physical_lock_id
    }

    /// Display title.
    pub fn title(&self) -> &str {
        &self.details.title
    }

    /// Nearby flag from the last update.
    pub fn is_nearby(&self) -> bool {
        self.details.nearby
    }

    /// True when no command is running and no outcome is displayed.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Outstanding operation. `None` unless [`LockState::InProgress`].
    pub fn outstanding_op(&self) -> Option<OperationId> {
        self.pending.map(|pending| pending.op)
    }

    /// Whether an idle-revert deadline is armed.
    pub fn has_idle_revert(&self) -> bool {
        self.revert.is_some()
    }

    /// Replace display data without touching command state.
    ///
    /// Returns the same instance so callers holding the entry keep a valid
    /// reference across roster refreshes.
    pub fn update_data(&mut self, details: LockDetails) -> &mut Self {
        debug_assert_eq!(details.physical_lock_id, self.details.physical_lock_id);
        self.details = details;
        self
    }

    /// Refresh only the nearby flag.
    pub fn set_nearby(&mut self, nearby: bool) {
        self.details.nearby = nearby;
    }

    /// Request a trigger command.
    ///
    /// `address` is the scanner's current address for this lock. No-op if a
    /// command is already in progress or the lock has no address (not in
    /// range); neither case is a failure.
    pub fn trigger(&mut self, address: Option<BleAddress>, now: I) -> Vec<CommandAction> {
        if self.state == LockState::InProgress {
            tracing::debug!(lock_id = %self.details.physical_lock_id, "trigger ignored, command in progress");
            return vec![];
        }

        let Some(address) = address else {
            tracing::info!(lock_id = %self.details.physical_lock_id, "trigger ignored, lock not nearby");
            return vec![];
        };

        if self.revert.take().is_some() {
            tracing::debug!(lock_id = %self.details.physical_lock_id, "idle revert superseded by trigger");
        }

        let op = OperationId(self.next_op);
        self.next_op += 1;
        self.pending = Some(Pending { op, started_at: now });
        self.state = LockState::InProgress;
        self.error_message = None;

        tracing::debug!(lock_id = %self.details.physical_lock_id, %op, %address, "trigger started");

        vec![
            CommandAction::Execute {
                op,
                address,
                physical_lock_id: self.details.physical_lock_id.clone(),
                command: CommandSpec::TriggerLock,
                timeout: self.config.command_timeout,
            },
            CommandAction::StateChanged(LockState::InProgress),
        ]
    }

    /// Apply the outcome of operation `op`.
    ///
    /// Outcomes for anything but the outstanding operation are ignored.
    pub fn handle_outcome(
        &mut self,
        op: OperationId,
        outcome: CommandOutcome,
        now: I,
    ) -> Vec<CommandAction> {
        if self.outstanding_op() != Some(op) {
            tracing::debug!(lock_id = %self.details.physical_lock_id, %op, "stale command outcome ignored");
            return vec![];
        }

        let code = match outcome {
            CommandOutcome::Completed(code) => code,
            CommandOutcome::Failed(reason) => {
                tracing::error!(
                    lock_id = %self.details.physical_lock_id,
                    %op,
                    %reason,
                    "trigger lock failed with an unhandled error"
                );
                CommandResultCode::TechnicalError
            },
            CommandOutcome::Cancelled => {
                tracing::warn!(lock_id = %self.details.physical_lock_id, %op, "trigger lock cancelled");
                CommandResultCode::TechnicalError
            },
        };

        self.complete(code, now)
    }

    /// Process deadlines: command timeout and idle revert.
    pub fn tick(&mut self, now: I) -> Vec<CommandAction> {
        if let Some(pending) = self.pending
            && now - pending.started_at >= self.config.command_timeout
        {
            tracing::warn!(
                lock_id = %self.details.physical_lock_id,
                op = %pending.op,
                timeout = ?self.config.command_timeout,
                "trigger lock timed out"
            );
            let mut actions = vec![CommandAction::Cancel { op: pending.op }];
            actions.extend(self.complete(CommandResultCode::TechnicalError, now));
            return actions;
        }

        if let Some(revert) = self.revert
            && now - revert.since >= revert.delay
        {
            self.revert = None;
            self.state = LockState::Idle;
            self.error_message = None;
            return vec![CommandAction::StateChanged(LockState::Idle), CommandAction::ReturnedToIdle];
        }

        vec![]
    }

    /// Time until the next deadline. `None` if nothing is armed.
    pub fn next_due(&self, now: I) -> Option<Duration> {
        let timeout = self
            .pending
            .map(|pending| self.config.command_timeout.saturating_sub(now - pending.started_at));
        let revert = self.revert.map(|revert| revert.delay.saturating_sub(now - revert.since));

        match (timeout, revert) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Release the outstanding operation and the idle-revert deadline.
    ///
    /// Call before discarding the machine so late outcomes cannot land.
    pub fn teardown(&mut self) -> Vec<CommandAction> {
        self.revert = None;
        match self.pending.take() {
            Some(pending) => vec![CommandAction::Cancel { op: pending.op }],
            None => vec![],
        }
    }

    fn complete(&mut self, code: CommandResultCode, now: I) -> Vec<CommandAction> {
        self.pending = None;

        let delay = if code.is_ok() {
            tracing::debug!(lock_id = %self.details.physical_lock_id, "lock opened successfully");
            self.state = LockState::Succeeded;
            self.error_message = None;
            self.config.success_display
        } else {
            tracing::info!(lock_id = %self.details.physical_lock_id, %code, "trigger lock failed");
            self.state = LockState::Failed;
            self.error_message = Some(code.message().to_string());
            self.config.error_display
        };

        self.revert = Some(IdleRevert { since: now, delay });
        vec![CommandAction::StateChanged(self.state)]
    }
}

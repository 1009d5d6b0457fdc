//! Scripted lock communicator for simulation.
//!
//! Each lock gets a queue of [`Step`]s consumed one per command. When a queue
//! is empty the default step applies, or a seeded random code in chaotic mode.
//! The communicator records every command and tracks how many run
//! concurrently per lock, so tests can assert on single-flight behavior.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use keyring_app::LockCommunicator;
use keyring_core::{BleAddress, CommandResultCode, CommandSpec, CommunicatorError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;

/// Scripted behavior of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Produce a result code after the configured latency.
    Respond(CommandResultCode),
    /// Raise a transport error after the configured latency.
    Fail(String),
    /// Never finish; only cancellation or the timeout ends the command.
    Hang,
}

/// One command as seen by the communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    /// Target lock.
    pub physical_lock_id: String,
    /// Address the command was sent to.
    pub address: BleAddress,
    /// Command that ran.
    pub command: CommandSpec,
}

#[derive(Debug)]
struct State {
    scripts: HashMap<String, VecDeque<Step>>,
    default_step: Step,
    latency: Duration,
    rng: Option<ChaCha8Rng>,
    executed: Vec<ExecutedCommand>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    cancelled: usize,
}

/// Shared scripted [`LockCommunicator`]. Clones share state.
#[derive(Debug, Clone)]
pub struct SimCommunicator {
    state: Arc<Mutex<State>>,
}

impl Default for SimCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCommunicator {
    /// Communicator that answers every command with `Ok` immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                scripts: HashMap::new(),
                default_step: Step::Respond(CommandResultCode::Ok),
                latency: Duration::ZERO,
                rng: None,
                executed: Vec::new(),
                in_flight: HashMap::new(),
                max_in_flight: HashMap::new(),
                cancelled: 0,
            })),
        }
    }

    /// Communicator that answers unscripted commands with random codes drawn
    /// from a generator seeded with `seed`.
    pub fn chaotic(seed: u64) -> Self {
        let communicator = Self::new();
        communicator.state().rng = Some(ChaCha8Rng::seed_from_u64(seed));
        communicator
    }

    /// Queue steps for the next commands to `physical_lock_id`.
    pub fn script(&self, physical_lock_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.state().scripts.entry(physical_lock_id.to_string()).or_default().extend(steps);
    }

    /// Step used when a lock has no script left.
    pub fn set_default(&self, step: Step) {
        self.state().default_step = step;
    }

    /// Delay before a command finishes.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Every command started so far, in order.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.state().executed.clone()
    }

    /// Number of commands started for a lock.
    pub fn executed_count(&self, physical_lock_id: &str) -> usize {
        self.state().executed.iter().filter(|c| c.physical_lock_id == physical_lock_id).count()
    }

    /// Commands currently running for a lock.
    pub fn in_flight(&self, physical_lock_id: &str) -> usize {
        self.state().in_flight.get(physical_lock_id).copied().unwrap_or(0)
    }

    /// Highest number of concurrent commands ever seen, per lock.
    pub fn max_in_flight(&self) -> HashMap<String, usize> {
        self.state().max_in_flight.clone()
    }

    /// Number of commands that observed cancellation.
    pub fn cancelled_count(&self) -> usize {
        self.state().cancelled
    }

    fn begin(
        &self,
        address: &BleAddress,
        physical_lock_id: &str,
        command: CommandSpec,
    ) -> (Step, Duration) {
        let mut state = self.state();
        state.executed.push(ExecutedCommand {
            physical_lock_id: physical_lock_id.to_string(),
            address: address.clone(),
            command,
        });

        let running = state.in_flight.entry(physical_lock_id.to_string()).or_default();
        *running += 1;
        let running = *running;
        let max = state.max_in_flight.entry(physical_lock_id.to_string()).or_default();
        *max = (*max).max(running);

        let state = &mut *state;
        let step = match state.scripts.get_mut(physical_lock_id).and_then(VecDeque::pop_front) {
            Some(step) => step,
            None => match state.rng.as_mut() {
                Some(rng) => {
                    let index = rng.gen_range(0..CommandResultCode::ALL.len());
                    Step::Respond(CommandResultCode::ALL[index])
                },
                None => state.default_step.clone(),
            },
        };
        (step, state.latency)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrements the in-flight count when the command future ends or is dropped.
struct InFlight {
    state: Arc<Mutex<State>>,
    physical_lock_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(running) = state.in_flight.get_mut(&self.physical_lock_id) {
            *running = running.saturating_sub(1);
        }
    }
}

impl LockCommunicator for SimCommunicator {
    fn execute_command(
        &self,
        address: &BleAddress,
        physical_lock_id: &str,
        command: CommandSpec,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandResultCode, CommunicatorError>> + Send {
        let (step, latency) = self.begin(address, physical_lock_id, command);
        let guard = InFlight {
            state: Arc::clone(&self.state),
            physical_lock_id: physical_lock_id.to_string(),
        };
        let state = Arc::clone(&self.state);

        async move {
            let _guard = guard;
            let work = async move {
                match step {
                    Step::Respond(code) => {
                        tokio::time::sleep(latency).await;
                        Ok(code)
                    },
                    Step::Fail(reason) => {
                        tokio::time::sleep(latency).await;
                        Err(CommunicatorError::Transport(reason))
                    },
                    Step::Hang => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    lock(&state).cancelled += 1;
                    Err(CommunicatorError::Cancelled)
                },
                result = tokio::time::timeout(timeout, work) => {
                    result.unwrap_or_else(|_| {
                        Err(CommunicatorError::Transport("command timed out".into()))
                    })
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> BleAddress {
        BleAddress("sim-a".into())
    }

    async fn run(
        communicator: &SimCommunicator,
        cancel: CancellationToken,
    ) -> Result<CommandResultCode, CommunicatorError> {
        communicator
            .execute_command(&addr(), "a", CommandSpec::TriggerLock, cancel, Duration::from_secs(15))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_steps_run_in_order() {
        let communicator = SimCommunicator::new();
        communicator.script("a", [
            Step::Respond(CommandResultCode::Unauthorized),
            Step::Fail("link lost".into()),
        ]);

        assert_eq!(
            run(&communicator, CancellationToken::new()).await,
            Ok(CommandResultCode::Unauthorized)
        );
        assert_eq!(
            run(&communicator, CancellationToken::new()).await,
            Err(CommunicatorError::Transport("link lost".into()))
        );
        assert_eq!(run(&communicator, CancellationToken::new()).await, Ok(CommandResultCode::Ok));
        assert_eq!(communicator.executed_count("a"), 3);
        assert_eq!(communicator.in_flight("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_command_ends_on_cancel() {
        let communicator = SimCommunicator::new();
        communicator.set_default(Step::Hang);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let communicator = communicator.clone();
            let cancel = cancel.clone();
            async move { run(&communicator, cancel).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(communicator.in_flight("a"), 1);

        cancel.cancel();
        let result = task.await.unwrap();

        assert_eq!(result, Err(CommunicatorError::Cancelled));
        assert_eq!(communicator.cancelled_count(), 1);
        assert_eq!(communicator.in_flight("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chaotic_mode_is_reproducible() {
        let first = SimCommunicator::chaotic(7);
        let second = SimCommunicator::chaotic(7);

        for _ in 0..10 {
            let a = run(&first, CancellationToken::new()).await;
            let b = run(&second, CancellationToken::new()).await;
            assert_eq!(a, b);
        }
    }
}

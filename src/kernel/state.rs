use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use super::event::{StateObserver, Transition, Trigger};
use super::telemetry::{Telemetry, TelemetryEvent};
use crate::error::VoiceError;
use crate::sync::lock;

/// The robot's conversational mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConversationState {
    /// Only the wake-word listener runs.
    #[default]
    Standby,
    /// Phrase endpointing runs; waiting for the user to say something.
    Listening,
    /// Transcription done, response generation in flight.
    Processing,
    /// Text-to-speech is playing the response.
    Speaking,
}

/// The transition table. Pure and total: every pair it does not list is `None`.
pub struct TransitionGraph;

impl TransitionGraph {
    pub fn transition(current: ConversationState, trigger: Trigger) -> Option<ConversationState> {
        use ConversationState::*;
        use Trigger::*;

        match (current, trigger) {
            // --- From Standby ---
            (Standby, WakeWordDetected) => Some(Listening),
            (Standby, WakeRequest) => Some(Listening),

            // --- From Listening ---
            (Listening, PhraseTranscribed) => Some(Processing),
            (Listening, IdleTimeout) => Some(Standby),

            // --- From Processing ---
            (Processing, ResponseReady) => Some(Speaking),
            (Processing, ResponseFailed) => Some(Listening),

            // --- From Speaking ---
            (Speaking, SpeechFinished) => Some(Listening),
            (Speaking, SpeechFailed) => Some(Listening),

            // --- Escape hatches ---
            (Listening | Processing, StopPhrase) => Some(Standby),
            (Listening | Processing | Speaking, SleepRequest) => Some(Standby),

            _ => None,
        }
    }
}

#[derive(Debug)]
struct MachineState {
    current: ConversationState,
    epoch: u64,
}

/// Owner of the single conversation state. All mutation goes through
/// `fire*`, each an atomic check-and-set under one lock.
pub struct StateMachine {
    state: Mutex<MachineState>,
    // Held from the state change until observers return, so they see
    // transitions in the order they were applied.
    dispatch: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn StateObserver>>>,
    telemetry: Telemetry,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Starts in `Standby` at epoch 0.
    pub fn new() -> Self {
        Self::with_telemetry(Telemetry::default())
    }

    pub fn with_telemetry(telemetry: Telemetry) -> Self {
        Self {
            state: Mutex::new(MachineState {
                current: ConversationState::Standby,
                epoch: 0,
            }),
            dispatch: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            telemetry,
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn StateObserver>) {
        self.observers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(observer);
    }

    pub fn state(&self) -> ConversationState {
        lock(&self.state).current
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    /// State and epoch read together.
    pub fn current(&self) -> (ConversationState, u64) {
        let state = lock(&self.state);
        (state.current, state.epoch)
    }

    pub fn fire(&self, trigger: Trigger) -> Option<Transition> {
        self.apply(trigger, None, || true)
    }

    /// Applies only if no other transition happened since `epoch`.
    /// Used for results of work started under an earlier state.
    pub fn fire_at(&self, trigger: Trigger, epoch: u64) -> Option<Transition> {
        self.apply(trigger, Some(epoch), || true)
    }

    /// Applies only if `guard` holds. The guard runs under the state lock,
    /// after the transition has been found valid.
    pub fn fire_if(&self, trigger: Trigger, guard: impl FnOnce() -> bool) -> Option<Transition> {
        self.apply(trigger, None, guard)
    }

    fn apply(
        &self,
        trigger: Trigger,
        expected_epoch: Option<u64>,
        guard: impl FnOnce() -> bool,
    ) -> Option<Transition> {
        let mut state = lock(&self.state);

        if let Some(expected) = expected_epoch {
            if state.epoch != expected {
                debug!(?trigger, expected, epoch = state.epoch, "Discarded stale trigger");
                self.telemetry.record(TelemetryEvent::RaceDropped { trigger });
                return None;
            }
        }

        let Some(next) = TransitionGraph::transition(state.current, trigger) else {
            let race = VoiceError::StateRace {
                state: state.current,
                trigger,
            };
            debug!("{}", race);
            self.telemetry.record(TelemetryEvent::RaceDropped { trigger });
            return None;
        };

        if !guard() {
            trace!(?trigger, state = ?state.current, "Transition guard declined");
            return None;
        }

        state.epoch += 1;
        let transition = Transition {
            from: state.current,
            to: next,
            trigger,
            epoch: state.epoch,
        };
        state.current = next;

        let _dispatch = lock(&self.dispatch);
        drop(state);

        info!(from = ?transition.from, to = ?transition.to, ?trigger, "Conversation transition");
        self.notify(&transition);
        Some(transition)
    }

    fn notify(&self, transition: &Transition) {
        let observers: Vec<_> = self
            .observers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_transition(transition))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(to = ?transition.to, "state observer failed: {:#}", e),
                Err(_) => error!(to = ?transition.to, "state observer panicked"),
            }
        }
    }
}

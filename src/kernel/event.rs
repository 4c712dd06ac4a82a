use serde::{Deserialize, Serialize};

use super::state::ConversationState;

/// Requests a state transition. These are requests, not commands: the
/// transition graph decides whether they apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    WakeWordDetected,
    /// Wake from outside the audio path (console, web, button).
    WakeRequest,
    /// Recognized text was non-empty and not the stop phrase.
    PhraseTranscribed,
    /// No voiced chunk for `idleTimeout` and nothing being transcribed.
    IdleTimeout,
    /// Recognized text matched the configured stop phrase.
    StopPhrase,
    ResponseReady,
    ResponseFailed,
    SpeechFinished,
    /// Text-to-speech refused to start.
    SpeechFailed,
    /// Put the robot to sleep from outside the audio path.
    SleepRequest,
}

/// An applied transition. `epoch` is the machine epoch after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ConversationState,
    pub to: ConversationState,
    pub trigger: Trigger,
    pub epoch: u64,
}

/// Receives every applied transition, in order, after the state lock is released.
///
/// Observers run on the thread that fired the trigger, in registration order.
/// An error or panic in one observer is logged and does not stop the others.
/// Observers must not fire triggers or read the machine from inside this call.
pub trait StateObserver: Send + Sync {
    fn on_transition(&self, transition: &Transition) -> anyhow::Result<()>;
}

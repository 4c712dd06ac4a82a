use serde::{Deserialize, Serialize};

use crate::kernel::event::Trigger;
use crate::kernel::state::ConversationState;

// Allowed: states, triggers, durations, counts.
// Forbidden: recognized text, response text, audio samples.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    StateTransition {
        from: ConversationState,
        to: ConversationState,
        trigger: Trigger,
    },

    /// A trigger dropped as stale or invalid for the current state.
    RaceDropped {
        trigger: Trigger,
    },

    PhraseEmitted {
        duration_ms: u64,
        voiced_ms: u64,
    },

    PhraseDiscarded {
        reason: DiscardReason,
    },

    /// A phrase completed while another was still being transcribed.
    SubmissionRejected,

    TranscriptionCompleted {
        latency_ms: u64,
        empty: bool,
    },

    TranscriptionFailed,

    TurnCompleted,

    TurnAbandoned {
        stage: TurnStage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// Never exceeded the onset threshold.
    NoVoice,
    /// Voiced span below the minimum phrase duration.
    TooShort,
    /// Endpointing stopped mid-phrase.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStage {
    Transcription,
    Response,
    Speech,
}

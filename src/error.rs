use std::time::Duration;

use thiserror::Error;

use crate::kernel::event::Trigger;
use crate::kernel::state::ConversationState;

/// Errors raised by an audio source or one of its streams.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Hardware missing or busy. Callers degrade to "feature disabled".
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("unknown audio stream {0}")]
    UnknownStream(u64),

    /// Transient failure on an otherwise working device.
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// The stage of a turn an external collaborator failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStage {
    WakeWord,
    SpeechToText,
    Response,
    TextToSpeech,
}

impl std::fmt::Display for EngineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineStage::WakeWord => "wake-word",
            EngineStage::SpeechToText => "speech-to-text",
            EngineStage::Response => "response",
            EngineStage::TextToSpeech => "text-to-speech",
        };
        f.write_str(name)
    }
}

/// Error taxonomy of the voice core. Nothing here is fatal to the host process.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error(transparent)]
    DeviceUnavailable(#[from] AudioError),

    /// An external engine raised. The turn is abandoned.
    #[error("{stage} engine failed: {source}")]
    EngineFailure {
        stage: EngineStage,
        #[source]
        source: anyhow::Error,
    },

    /// Phrase shorter than the minimum viable length. Discarded silently.
    #[error("phrase too short ({voiced:?} of speech, need {minimum:?})")]
    BufferUnderrun { voiced: Duration, minimum: Duration },

    /// A trigger arrived for a state it is no longer valid in.
    #[error("trigger {trigger:?} is stale in state {state:?}")]
    StateRace {
        state: ConversationState,
        trigger: Trigger,
    },

    /// A phrase arrived while another one was being transcribed.
    #[error("transcription already in flight, phrase rejected")]
    Rejected,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VoiceError {
    pub fn engine(stage: EngineStage, source: anyhow::Error) -> Self {
        VoiceError::EngineFailure { stage, source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

//! Contracts of the external engines the voice core drives.
//!
//! Every call may fail; the core turns failures into a safe next state and
//! never lets them reach the host process.

use serde::{Deserialize, Serialize};

use crate::audio::AudioChunk;

/// Decides per chunk whether the wake word was heard.
pub trait WakeWordEngine: Send {
    fn detect(&mut self, chunk: &AudioChunk) -> anyhow::Result<bool>;
}

/// Turns a mono f32 buffer into text. Empty text means nothing recognizable.
pub trait SpeechToText: Send + Sync {
    fn transcribe(&self, samples: &[f32], language: &str) -> anyhow::Result<String>;

    /// Sample rate the engine expects its input at.
    fn sample_rate(&self) -> u32 {
        16_000
    }
}

/// One finished exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub recognized_text: String,
    pub response_text: String,
}

/// Produces the robot's reply to `text`, given the previous turns (oldest first).
pub trait ResponseGenerator: Send + Sync {
    fn generate(&self, history: &[Turn], text: &str) -> anyhow::Result<String>;
}

/// Invoked exactly once when an utterance has been fully spoken.
pub type SpeechCompletion = Box<dyn FnOnce() + Send + 'static>;

/// Speaks asynchronously. `speak` returns once playback has started.
pub trait TextToSpeech: Send + Sync {
    fn speak(&self, text: &str, on_complete: SpeechCompletion) -> anyhow::Result<()>;

    /// Stops the current utterance, if any.
    fn cancel(&self);
}

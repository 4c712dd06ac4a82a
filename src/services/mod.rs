//! Engine adapters for local servers and commands.

pub mod llm;
pub mod stt;
pub mod tts;
pub mod wake;

pub use llm::LlmResponder;
pub use stt::WhisperServerTranscriber;
pub use tts::CommandSpeaker;
pub use wake::SpokenWakeWord;

pub mod audio;
pub mod config;
pub mod engines;
pub mod error;
pub mod kernel;
pub mod services;
mod sync;

// Re-export specific items if needed for convenient access
pub use config::{AppConfig, VoiceConfig};
pub use error::VoiceError;
pub use kernel::pipeline::{Engines, VoicePipeline};
pub use kernel::state::{ConversationState, StateMachine};

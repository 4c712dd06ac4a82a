pub mod audio;
pub mod cancel;
pub mod coordinator;
pub mod event;
pub mod pipeline;
pub mod routing;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod transcription;
pub mod wake;

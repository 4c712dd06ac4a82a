use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{info, warn};

use super::event::Trigger;
use super::state::StateMachine;
use crate::audio::{AudioChunk, ChunkSink};
use crate::engines::WakeWordEngine;
use crate::error::{EngineStage, VoiceError};

/// Consumer of the wake stream. Runs the wake-word engine on every chunk and
/// fires `WakeWordDetected` on a hit.
pub struct WakeListener {
    engine: Box<dyn WakeWordEngine>,
    machine: Arc<StateMachine>,
    failing: bool,
}

impl WakeListener {
    pub fn new(engine: Box<dyn WakeWordEngine>, machine: Arc<StateMachine>) -> Self {
        Self {
            engine,
            machine,
            failing: false,
        }
    }

    fn detect(&mut self, chunk: &AudioChunk) -> Result<bool, VoiceError> {
        match catch_unwind(AssertUnwindSafe(|| self.engine.detect(chunk))) {
            Ok(result) => result.map_err(|e| VoiceError::engine(EngineStage::WakeWord, e)),
            Err(_) => Err(VoiceError::engine(
                EngineStage::WakeWord,
                anyhow!("wake-word engine panicked"),
            )),
        }
    }
}

impl ChunkSink for WakeListener {
    fn on_chunk(&mut self, chunk: AudioChunk) {
        match self.detect(&chunk) {
            Ok(true) => {
                self.failing = false;
                if self.machine.fire(Trigger::WakeWordDetected).is_some() {
                    info!("Wake word detected");
                }
            }
            Ok(false) => self.failing = false,
            Err(e) => {
                // Warn once per failure streak.
                if !self.failing {
                    warn!("{}", e);
                }
                self.failing = true;
            }
        }
    }
}

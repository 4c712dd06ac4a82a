use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use super::audio::Endpointer;
use super::event::{StateObserver, Transition};
use super::state::ConversationState;
use crate::audio::{AudioSource, StreamHandle};

/// Entry actions: routes audio to the wake listener or the endpointer
/// depending on the state just entered.
pub struct AudioRouting {
    source: Arc<dyn AudioSource>,
    phrase_stream: StreamHandle,
    wake_stream: StreamHandle,
    endpointer: Arc<Endpointer>,
}

impl AudioRouting {
    pub fn new(
        source: Arc<dyn AudioSource>,
        phrase_stream: StreamHandle,
        wake_stream: StreamHandle,
        endpointer: Arc<Endpointer>,
    ) -> Self {
        Self {
            source,
            phrase_stream,
            wake_stream,
            endpointer,
        }
    }

    pub fn enter(&self, state: ConversationState) -> anyhow::Result<()> {
        match state {
            ConversationState::Standby => {
                self.endpointer.disable();
                self.source
                    .pause(self.phrase_stream)
                    .context("pausing phrase stream")?;
                self.source
                    .start(self.wake_stream)
                    .context("starting wake stream")?;
            }
            ConversationState::Listening => {
                self.source
                    .pause(self.wake_stream)
                    .context("pausing wake stream")?;
                self.endpointer.enable();
                self.source
                    .start(self.phrase_stream)
                    .context("starting phrase stream")?;
            }
            ConversationState::Processing | ConversationState::Speaking => {
                self.endpointer.disable();
            }
        }
        debug!(?state, "Audio routed");
        Ok(())
    }
}

impl StateObserver for AudioRouting {
    fn on_transition(&self, transition: &Transition) -> anyhow::Result<()> {
        self.enter(transition.to)
    }
}

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use anyhow::anyhow;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cancel::{Shutdown, StopPhrase};
use super::event::Trigger;
use super::state::{ConversationState, StateMachine};
use super::telemetry::{Telemetry, TelemetryEvent, TurnStage};
use super::transcription::{Transcript, TranscriptListener};
use crate::config::VoiceConfig;
use crate::engines::{ResponseGenerator, TextToSpeech, Turn};
use crate::error::{EngineStage, VoiceError};
use crate::sync::lock;

/// Last N turns, oldest first.
#[derive(Debug)]
struct History {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, turn: Turn) {
        if self.capacity == 0 {
            return;
        }
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    fn to_vec(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }
}

/// Drives one turn from transcript to spoken reply.
///
/// Each stage that completes asynchronously fires with the epoch of the
/// transition that started it, so a result from an abandoned turn can never
/// move the machine.
pub struct TurnCoordinator {
    me: Weak<TurnCoordinator>,
    machine: Arc<StateMachine>,
    generator: Arc<dyn ResponseGenerator>,
    tts: Arc<dyn TextToSpeech>,
    stop_phrase: StopPhrase,
    history: Mutex<History>,
    telemetry: Telemetry,
    shutdown: Shutdown,
}

impl TurnCoordinator {
    pub fn new(
        config: &VoiceConfig,
        machine: Arc<StateMachine>,
        generator: Arc<dyn ResponseGenerator>,
        tts: Arc<dyn TextToSpeech>,
        telemetry: Telemetry,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            machine,
            generator,
            tts,
            stop_phrase: StopPhrase::new(&config.stop_phrase),
            history: Mutex::new(History::new(config.history_turns)),
            telemetry,
            shutdown,
        })
    }

    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    pub fn history(&self) -> Vec<Turn> {
        lock(&self.history).to_vec()
    }

    /// Wake without the wake word. Ignored outside `Standby`.
    pub fn request_wake(&self) -> bool {
        self.machine.fire(Trigger::WakeRequest).is_some()
    }

    /// Back to `Standby` from anywhere, cutting off speech in progress.
    pub fn request_sleep(&self) -> bool {
        let slept = self.machine.fire(Trigger::SleepRequest).is_some();
        if slept {
            // After the transition, so the completion callback finds a newer epoch.
            self.tts.cancel();
        }
        slept
    }

    pub fn shutdown(&self) {
        self.tts.cancel();
    }

    fn handle_text(&self, phrase: Uuid, text: String) {
        if self.stop_phrase.matches(&text) {
            if self.machine.fire(Trigger::StopPhrase).is_some() {
                info!(%phrase, "Stop phrase heard, going to standby");
            }
            return;
        }

        self.telemetry.transcript(&text);
        let Some(transition) = self.machine.fire(Trigger::PhraseTranscribed) else {
            debug!(%phrase, "Transcript arrived outside Listening, dropped");
            return;
        };

        let Some(me) = self.me.upgrade() else {
            return;
        };
        let epoch = transition.epoch;
        if let Err(e) = self.shutdown.spawn("response", move || me.respond(text, epoch)) {
            error!(%phrase, "Failed to spawn response thread: {}", e);
            self.machine.fire_at(Trigger::ResponseFailed, epoch);
            self.telemetry.record(TelemetryEvent::TurnAbandoned {
                stage: TurnStage::Response,
            });
        }
    }

    fn respond(&self, text: String, epoch: u64) {
        let history = self.history();
        let response = match self.generate(&history, &text) {
            Ok(response) => response,
            Err(e) => {
                warn!("{}", e);
                self.telemetry.record(TelemetryEvent::TurnAbandoned {
                    stage: TurnStage::Response,
                });
                self.machine.fire_at(Trigger::ResponseFailed, epoch);
                return;
            }
        };

        if self.shutdown.is_cancelled() {
            return;
        }

        self.telemetry.response(&response);
        let Some(transition) = self.machine.fire_at(Trigger::ResponseReady, epoch) else {
            debug!("Turn was abandoned while generating, response dropped");
            return;
        };

        lock(&self.history).push(Turn {
            recognized_text: text,
            response_text: response.clone(),
        });

        self.speak(&response, transition.epoch);
    }

    fn generate(&self, history: &[Turn], text: &str) -> Result<String, VoiceError> {
        let response = match catch_unwind(AssertUnwindSafe(|| self.generator.generate(history, text))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(VoiceError::engine(EngineStage::Response, e)),
            Err(_) => {
                return Err(VoiceError::engine(
                    EngineStage::Response,
                    anyhow!("response generator panicked"),
                ))
            }
        };

        let response = response.trim();
        if response.is_empty() {
            return Err(VoiceError::engine(
                EngineStage::Response,
                anyhow!("empty response"),
            ));
        }
        Ok(response.to_string())
    }

    fn speak(&self, response: &str, epoch: u64) {
        let machine = Arc::clone(&self.machine);
        let telemetry = self.telemetry.clone();
        let on_complete = Box::new(move || {
            if machine.fire_at(Trigger::SpeechFinished, epoch).is_some() {
                telemetry.record(TelemetryEvent::TurnCompleted);
            }
        });

        let started = match catch_unwind(AssertUnwindSafe(|| self.tts.speak(response, on_complete))) {
            Ok(result) => result.map_err(|e| VoiceError::engine(EngineStage::TextToSpeech, e)),
            Err(_) => Err(VoiceError::engine(
                EngineStage::TextToSpeech,
                anyhow!("text-to-speech engine panicked"),
            )),
        };

        if let Err(e) = started {
            warn!("{}", e);
            self.telemetry.record(TelemetryEvent::TurnAbandoned {
                stage: TurnStage::Speech,
            });
            self.machine.fire_at(Trigger::SpeechFailed, epoch);
        }
    }
}

impl TranscriptListener for TurnCoordinator {
    fn on_transcript(&self, phrase: Uuid, outcome: Result<Transcript, VoiceError>) {
        match outcome {
            Ok(Transcript::Text(text)) => self.handle_text(phrase, text),
            Ok(Transcript::NoSpeechDetected) => {
                debug!(%phrase, "Nothing recognized, still listening");
            }
            Err(e) => {
                warn!(%phrase, "Turn abandoned: {}", e);
                self.telemetry.record(TelemetryEvent::TurnAbandoned {
                    stage: TurnStage::Transcription,
                });
            }
        }
    }
}

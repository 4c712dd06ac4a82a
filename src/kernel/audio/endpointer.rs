use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::segment::{Phrase, PhraseBuffer};
use super::{CaptureState, EndpointerState, Mode, SharedCapture};
use crate::audio::AudioChunk;
use crate::config::VoiceConfig;
use crate::kernel::event::Trigger;
use crate::kernel::state::StateMachine;
use crate::kernel::telemetry::{DiscardReason, Telemetry, TelemetryEvent};
use crate::kernel::transcription::{Admission, TranscriptionWorker};
use crate::sync::lock;

/// Consistent view of the capture unit, read under one lock acquisition.
#[derive(Debug, Clone)]
pub struct EndpointerSnapshot {
    pub state: EndpointerState,
    pub enabled: bool,
    pub pre_roll: Vec<AudioChunk>,
    pub phrase: Vec<AudioChunk>,
    pub transcription_in_progress: bool,
}

/// Energy-based voice activity detection with a pre-roll.
///
/// `Idle` -> `Buffering` when a chunk exceeds the onset threshold; the new
/// phrase starts with the pre-roll so the first syllable survives detector
/// latency. `Buffering` ends once trailing silence reaches the phrase timeout.
/// A much longer idle timeout asks the state machine to return to standby.
pub struct Endpointer {
    shared: SharedCapture,
    onset_threshold_db: f32,
    phrase_timeout: Duration,
    idle_timeout: Duration,
    worker: Arc<TranscriptionWorker>,
    machine: Arc<StateMachine>,
    telemetry: Telemetry,
}

impl Endpointer {
    pub fn new(
        config: &VoiceConfig,
        shared: SharedCapture,
        worker: Arc<TranscriptionWorker>,
        machine: Arc<StateMachine>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            shared,
            onset_threshold_db: config.onset_threshold_db,
            phrase_timeout: config.phrase_timeout(),
            idle_timeout: config.idle_timeout(),
            worker,
            machine,
            telemetry,
        }
    }

    /// Per-chunk update. Runs on the audio callback thread.
    pub fn process(&self, chunk: AudioChunk) {
        self.telemetry.level(chunk.telemetry_level().db());

        let (submit, idle_expired) = {
            let mut guard = lock(&self.shared);
            let state = &mut *guard;

            if !state.enabled {
                state.pre_roll.push(chunk);
                return;
            }

            let start = state.clock.now();
            let end = state.clock.advance(chunk.len(), chunk.sample_rate());
            let voiced = chunk.level().exceeds(self.onset_threshold_db);
            if voiced {
                state.last_activity = end;
            }

            let mut submit = None;
            match &mut state.mode {
                Mode::Idle => {
                    if voiced {
                        let mut phrase = PhraseBuffer::seeded(&state.pre_roll, start);
                        phrase.push(chunk.clone(), true, start, end);
                        debug!(pre_roll = state.pre_roll.len(), "Speech onset");
                        state.mode = Mode::Buffering(phrase);
                    }
                }
                Mode::Buffering(phrase) => {
                    phrase.push(chunk.clone(), voiced, start, end);
                    if phrase.silence_at(end) >= self.phrase_timeout {
                        if let Mode::Buffering(phrase) = std::mem::replace(&mut state.mode, Mode::Idle) {
                            submit = self.finish(state, phrase);
                        }
                    }
                }
            }

            state.pre_roll.push(chunk);

            let idle_expired = matches!(state.mode, Mode::Idle)
                && end.since(state.last_activity) >= self.idle_timeout;
            (submit, idle_expired)
        };

        if let Some(phrase) = submit {
            self.worker.spawn(phrase);
        }

        if idle_expired {
            self.request_standby();
        }
    }

    /// Hands a finished phrase to the worker's admission under the lock.
    fn finish(&self, state: &mut CaptureState, phrase: PhraseBuffer) -> Option<Phrase> {
        if !phrase.has_voice() {
            debug!(chunks = phrase.len(), "Phrase never exceeded threshold, discarded");
            self.telemetry.record(TelemetryEvent::PhraseDiscarded {
                reason: DiscardReason::NoVoice,
            });
            return None;
        }

        let sample_rate = phrase.chunks().first().map(AudioChunk::sample_rate).unwrap_or_default();
        let phrase = phrase.into_phrase(sample_rate);
        let duration_ms = phrase.duration().as_millis() as u64;
        let voiced_ms = phrase.voiced.as_millis() as u64;
        info!(phrase = %phrase.id, duration_ms, voiced_ms, "Audio Control: Phrase END detected");

        let submit = match self.worker.admit(state, phrase) {
            Admission::Run(phrase) => Some(phrase),
            Admission::Queued => None,
            Admission::Rejected | Admission::TooShort => return None,
        };
        self.telemetry.record(TelemetryEvent::PhraseEmitted {
            duration_ms,
            voiced_ms,
        });
        submit
    }

    /// The transcription flag is re-read under the state machine's lock; if a
    /// transcription is running the request is dropped and retried next chunk.
    fn request_standby(&self) {
        let shared = Arc::clone(&self.shared);
        let fired = self
            .machine
            .fire_if(Trigger::IdleTimeout, move || !lock(&shared).transcription_in_progress);
        if fired.is_some() {
            info!(idle_secs = self.idle_timeout.as_secs_f32(), "Idle timeout, returning to standby");
        }
    }

    /// Starts endpointing from a clean slate.
    pub fn enable(&self) {
        let mut state = lock(&self.shared);
        state.enabled = true;
        state.mode = Mode::Idle;
        state.pre_roll.clear();
        state.last_activity = state.clock.now();
    }

    /// Stops endpointing. A phrase in progress is dropped without transcription.
    pub fn disable(&self) {
        let mut state = lock(&self.shared);
        state.enabled = false;
        if let Mode::Buffering(phrase) = std::mem::replace(&mut state.mode, Mode::Idle) {
            debug!(chunks = phrase.len(), "Endpointing stopped mid-phrase, discarded");
            self.telemetry.record(TelemetryEvent::PhraseDiscarded {
                reason: DiscardReason::Stopped,
            });
        }
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.shared).enabled
    }

    pub fn snapshot(&self) -> EndpointerSnapshot {
        let state = lock(&self.shared);
        EndpointerSnapshot {
            state: state.endpointer_state(),
            enabled: state.enabled,
            pre_roll: state.pre_roll.contents(),
            phrase: match &state.mode {
                Mode::Idle => Vec::new(),
                Mode::Buffering(phrase) => phrase.chunks().to_vec(),
            },
            transcription_in_progress: state.transcription_in_progress,
        }
    }
}

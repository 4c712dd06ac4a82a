use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::audio::segment::Phrase;
use super::audio::{CaptureState, SharedCapture};
use super::cancel::Shutdown;
use super::telemetry::{DiscardReason, Telemetry, TelemetryEvent};
use crate::audio::processing::{normalize_chunks, resample};
use crate::config::{OverlapPolicy, VoiceConfig};
use crate::engines::SpeechToText;
use crate::error::{EngineStage, VoiceError};
use crate::sync::lock;

/// What a recognizer made of a phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Text(String),
    /// The engine returned nothing but whitespace.
    NoSpeechDetected,
}

/// Receives exactly one outcome per admitted phrase, after the in-flight
/// flag for that phrase has been cleared.
pub trait TranscriptListener: Send + Sync {
    fn on_transcript(&self, phrase: Uuid, outcome: Result<Transcript, VoiceError>);
}

/// Decision taken for a completed phrase.
#[derive(Debug)]
pub enum Admission {
    /// The slot was free and has been claimed; the caller must spawn.
    Run(Phrase),
    /// Held until the in-flight transcription finishes.
    Queued,
    Rejected,
    TooShort,
}

/// Runs at most one transcription at a time on a background thread.
pub struct TranscriptionWorker {
    shared: SharedCapture,
    engine: Arc<dyn SpeechToText>,
    listener: RwLock<Option<Arc<dyn TranscriptListener>>>,
    language: String,
    min_phrase: Duration,
    policy: OverlapPolicy,
    telemetry: Telemetry,
    shutdown: Shutdown,
}

impl TranscriptionWorker {
    pub fn new(
        config: &VoiceConfig,
        shared: SharedCapture,
        engine: Arc<dyn SpeechToText>,
        telemetry: Telemetry,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            shared,
            engine,
            listener: RwLock::new(None),
            language: config.language.clone(),
            min_phrase: config.min_phrase_duration(),
            policy: config.overlap_policy,
            telemetry,
            shutdown,
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn TranscriptListener>) {
        *self
            .listener
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(listener);
    }

    pub fn is_transcribing(&self) -> bool {
        lock(&self.shared).transcription_in_progress
    }

    /// Admission check. Must be called with the capture lock held so the
    /// flag is claimed in the same critical section the phrase ended in.
    pub(crate) fn admit(&self, state: &mut CaptureState, phrase: Phrase) -> Admission {
        if phrase.voiced < self.min_phrase {
            let underrun = VoiceError::BufferUnderrun {
                voiced: phrase.voiced,
                minimum: self.min_phrase,
            };
            debug!(phrase = %phrase.id, "{}", underrun);
            self.telemetry.record(TelemetryEvent::PhraseDiscarded {
                reason: DiscardReason::TooShort,
            });
            return Admission::TooShort;
        }

        if !state.transcription_in_progress {
            state.transcription_in_progress = true;
            return Admission::Run(phrase);
        }

        match self.policy {
            OverlapPolicy::Queue if state.pending.is_none() => {
                debug!(phrase = %phrase.id, "Transcription busy, phrase queued");
                state.pending = Some(phrase);
                Admission::Queued
            }
            _ => {
                info!(phrase = %phrase.id, "{}", VoiceError::Rejected);
                self.telemetry.record(TelemetryEvent::SubmissionRejected);
                Admission::Rejected
            }
        }
    }

    /// Submits a phrase from outside the endpointer.
    pub fn submit(self: &Arc<Self>, phrase: Phrase) -> Result<(), VoiceError> {
        let voiced = phrase.voiced;
        let admission = {
            let mut state = lock(&self.shared);
            self.admit(&mut state, phrase)
        };

        match admission {
            Admission::Run(phrase) => {
                self.spawn(phrase);
                Ok(())
            }
            Admission::Queued => Ok(()),
            Admission::Rejected => Err(VoiceError::Rejected),
            Admission::TooShort => Err(VoiceError::BufferUnderrun {
                voiced,
                minimum: self.min_phrase,
            }),
        }
    }

    /// Starts the background run for a phrase whose slot was already claimed.
    pub(crate) fn spawn(self: &Arc<Self>, phrase: Phrase) {
        let worker = Arc::clone(self);
        let id = phrase.id;
        if let Err(e) = self.shutdown.spawn("transcription", move || worker.run(phrase)) {
            error!(phrase = %id, "Failed to spawn transcription thread: {}", e);
            let mut state = lock(&self.shared);
            state.transcription_in_progress = false;
            state.pending = None;
        }
    }

    fn run(&self, mut phrase: Phrase) {
        loop {
            let started = Instant::now();
            let (outcome, next) = {
                let slot = InFlight::new(&self.shared);
                let outcome = self.transcribe(&phrase);
                (outcome, slot.release())
            };

            match &outcome {
                Ok(transcript) => self.telemetry.record(TelemetryEvent::TranscriptionCompleted {
                    latency_ms: started.elapsed().as_millis() as u64,
                    empty: *transcript == Transcript::NoSpeechDetected,
                }),
                Err(e) => {
                    debug!(phrase = %phrase.id, "Transcription failed: {}", e);
                    self.telemetry.record(TelemetryEvent::TranscriptionFailed);
                }
            }

            if self.shutdown.is_cancelled() {
                debug!(phrase = %phrase.id, "Shutting down, transcript dropped");
                if next.is_some() {
                    lock(&self.shared).transcription_in_progress = false;
                }
                return;
            }
            self.deliver(phrase.id, outcome);

            match next {
                Some(queued) => phrase = queued,
                None => return,
            }
        }
    }

    fn transcribe(&self, phrase: &Phrase) -> Result<Transcript, VoiceError> {
        let samples = normalize_chunks(&phrase.chunks);
        let samples = resample(samples, phrase.sample_rate, self.engine.sample_rate())
            .map_err(|e| VoiceError::engine(EngineStage::SpeechToText, e))?;

        debug!(phrase = %phrase.id, samples = samples.len(), "Transcribing phrase");
        let text = match catch_unwind(AssertUnwindSafe(|| self.engine.transcribe(&samples, &self.language))) {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(VoiceError::engine(EngineStage::SpeechToText, e)),
            Err(_) => {
                return Err(VoiceError::engine(
                    EngineStage::SpeechToText,
                    anyhow!("speech-to-text engine panicked"),
                ))
            }
        };

        let text = text.trim();
        if text.is_empty() {
            Ok(Transcript::NoSpeechDetected)
        } else {
            Ok(Transcript::Text(text.to_string()))
        }
    }

    fn deliver(&self, phrase: Uuid, outcome: Result<Transcript, VoiceError>) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        let Some(listener) = listener else {
            debug!(%phrase, "No transcript listener attached");
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| listener.on_transcript(phrase, outcome))).is_err() {
            error!(%phrase, "transcript listener panicked");
        }
    }
}

/// Holds the in-flight slot. `release` hands it to the queued phrase if one
/// is waiting; dropping without release always frees it.
struct InFlight<'a> {
    shared: &'a SharedCapture,
    released: bool,
}

impl<'a> InFlight<'a> {
    fn new(shared: &'a SharedCapture) -> Self {
        Self {
            shared,
            released: false,
        }
    }

    fn release(mut self) -> Option<Phrase> {
        self.released = true;
        let mut state = lock(self.shared);
        let next = state.pending.take();
        state.transcription_in_progress = next.is_some();
        next
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut state = lock(self.shared);
        state.transcription_in_progress = false;
        state.pending = None;
    }
}

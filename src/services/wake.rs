//! Wake-word detection without a dedicated model.
//!
//! Short utterances are found with the same energy test the endpointer uses,
//! then checked against the wake words with the speech-to-text engine on a
//! side thread. The audio thread only ever polls for the verdict. Check
//! threads are tracked by the pipeline's `Shutdown`.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, trace};

use crate::audio::processing::{normalize, resample};
use crate::audio::AudioChunk;
use crate::engines::{SpeechToText, WakeWordEngine};
use crate::kernel::cancel::Shutdown;

/// Shortest candidate utterance worth transcribing.
const MIN_SPEECH: Duration = Duration::from_millis(300);
/// Silence that closes a candidate.
const END_SILENCE: Duration = Duration::from_millis(500);
/// Longest candidate; wake words are short.
const MAX_SEGMENT: Duration = Duration::from_secs(3);

pub struct SpokenWakeWord {
    stt: Arc<dyn SpeechToText>,
    wake_words: Vec<String>,
    language: String,
    threshold_db: f32,
    segment: Vec<i16>,
    sample_rate: u32,
    voiced: Duration,
    silence: Duration,
    verdict: Option<Receiver<Result<bool>>>,
    shutdown: Shutdown,
}

impl SpokenWakeWord {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        wake_words: Vec<String>,
        language: impl Into<String>,
        threshold_db: f32,
        shutdown: Shutdown,
    ) -> Self {
        let wake_words = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            stt,
            wake_words,
            language: language.into(),
            threshold_db,
            segment: Vec::new(),
            sample_rate: 0,
            voiced: Duration::ZERO,
            silence: Duration::ZERO,
            verdict: None,
            shutdown,
        }
    }

    fn reset(&mut self) {
        self.segment.clear();
        self.voiced = Duration::ZERO;
        self.silence = Duration::ZERO;
    }

    fn check(&mut self) {
        if self.shutdown.is_cancelled() {
            self.reset();
            return;
        }
        let samples = normalize(&self.segment);
        let from = self.sample_rate;
        let stt = Arc::clone(&self.stt);
        let words = self.wake_words.clone();
        let language = self.language.clone();
        let (tx, rx) = mpsc::channel();

        let spawned = self.shutdown.spawn("wake-check", move || {
            let verdict = resample(samples, from, stt.sample_rate())
                .and_then(|samples| stt.transcribe(&samples, &language))
                .map(|text| {
                    let text = text.to_lowercase();
                    trace!(%text, "Wake candidate transcribed");
                    words.iter().any(|w| text.contains(w.as_str()))
                });
            let _ = tx.send(verdict);
        });

        match spawned {
            Ok(()) => self.verdict = Some(rx),
            Err(e) => debug!("wake check not started: {}", e),
        }
        self.reset();
    }
}

impl WakeWordEngine for SpokenWakeWord {
    fn detect(&mut self, chunk: &AudioChunk) -> Result<bool> {
        if let Some(verdict) = &self.verdict {
            match verdict.try_recv() {
                Ok(result) => {
                    self.verdict = None;
                    return result;
                }
                // Audio heard while a check runs is skipped.
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Disconnected) => self.verdict = None,
            }
        }

        let voiced = chunk.level().exceeds(self.threshold_db);
        if self.segment.is_empty() && !voiced {
            return Ok(false);
        }

        self.sample_rate = chunk.sample_rate();
        self.segment.extend_from_slice(chunk.samples());
        if voiced {
            self.voiced += chunk.duration();
            self.silence = Duration::ZERO;
        } else {
            self.silence += chunk.duration();
        }

        let length = Duration::from_secs_f64(self.segment.len() as f64 / self.sample_rate.max(1) as f64);
        if self.silence >= END_SILENCE || length >= MAX_SEGMENT {
            if self.voiced >= MIN_SPEECH && !self.wake_words.is_empty() {
                self.check();
            } else {
                self.reset();
            }
        }
        Ok(false)
    }
}

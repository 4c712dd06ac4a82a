use std::collections::VecDeque;
use std::time::Duration;

use uuid::Uuid;

use crate::audio::AudioChunk;
use crate::kernel::time::StreamInstant;

/// Bounded FIFO of the most recent chunks, kept regardless of speech state.
#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    chunks: VecDeque<AudioChunk>,
    capacity: usize,
}

impl PreRollBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a chunk, evicting the oldest on overflow.
    pub fn push(&mut self, chunk: AudioChunk) {
        if self.capacity == 0 {
            return;
        }
        while self.chunks.len() >= self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contents(&self) -> Vec<AudioChunk> {
        self.chunks.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

/// Chunks accumulated from speech onset until endpointing fires.
#[derive(Debug, Clone)]
pub struct PhraseBuffer {
    chunks: Vec<AudioChunk>,
    first_voice: Option<StreamInstant>,
    last_voice_end: StreamInstant,
}

impl PhraseBuffer {
    /// Starts a phrase with the current pre-roll contents, oldest first.
    pub fn seeded(pre_roll: &PreRollBuffer, onset: StreamInstant) -> Self {
        Self {
            chunks: pre_roll.contents(),
            first_voice: None,
            last_voice_end: onset,
        }
    }

    /// `start`/`end` bound the chunk in stream time.
    pub fn push(&mut self, chunk: AudioChunk, voiced: bool, start: StreamInstant, end: StreamInstant) {
        if voiced {
            self.first_voice.get_or_insert(start);
            self.last_voice_end = end;
        }
        self.chunks.push(chunk);
    }

    /// True if any chunk exceeded the onset threshold.
    pub fn has_voice(&self) -> bool {
        self.first_voice.is_some()
    }

    /// Span from the first to the end of the last voiced chunk.
    pub fn voiced_duration(&self) -> Duration {
        match self.first_voice {
            Some(first) => self.last_voice_end.since(first),
            None => Duration::ZERO,
        }
    }

    /// Trailing silence measured at `now`.
    pub fn silence_at(&self, now: StreamInstant) -> Duration {
        now.since(self.last_voice_end)
    }

    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn into_phrase(self, sample_rate: u32) -> Phrase {
        let voiced = self.voiced_duration();
        Phrase {
            id: Uuid::new_v4(),
            chunks: self.chunks,
            sample_rate,
            voiced,
        }
    }
}

/// A completed phrase on its way to transcription.
#[derive(Debug, Clone)]
pub struct Phrase {
    pub id: Uuid,
    pub chunks: Vec<AudioChunk>,
    pub sample_rate: u32,
    /// Span of actual speech, excluding pre-roll and trailing silence.
    pub voiced: Duration,
}

impl Phrase {
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(AudioChunk::len).sum()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / self.sample_rate as f64)
    }
}

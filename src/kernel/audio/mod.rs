pub mod endpointer;
pub mod segment;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::kernel::time::{StreamClock, StreamInstant};
use segment::{Phrase, PhraseBuffer, PreRollBuffer};

pub use endpointer::{Endpointer, EndpointerSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointerState {
    /// No speech yet; only the pre-roll is maintained.
    Idle,
    /// A phrase is being accumulated.
    Buffering,
}

#[derive(Debug)]
pub(crate) enum Mode {
    Idle,
    Buffering(PhraseBuffer),
}

/// Endpointer state, buffers and the transcription flag: one unit behind one
/// lock. Only the audio callback thread and the transcription worker touch it.
#[derive(Debug)]
pub struct CaptureState {
    pub(crate) mode: Mode,
    pub(crate) enabled: bool,
    pub(crate) clock: StreamClock,
    pub(crate) pre_roll: PreRollBuffer,
    pub(crate) last_activity: StreamInstant,
    pub(crate) transcription_in_progress: bool,
    pub(crate) pending: Option<Phrase>,
}

impl CaptureState {
    pub fn new(pre_roll_chunks: usize) -> Self {
        Self {
            mode: Mode::Idle,
            enabled: false,
            clock: StreamClock::new(),
            pre_roll: PreRollBuffer::new(pre_roll_chunks),
            last_activity: StreamInstant::default(),
            transcription_in_progress: false,
            pending: None,
        }
    }

    pub fn endpointer_state(&self) -> EndpointerState {
        match self.mode {
            Mode::Idle => EndpointerState::Idle,
            Mode::Buffering(_) => EndpointerState::Buffering,
        }
    }

    pub fn transcription_in_progress(&self) -> bool {
        self.transcription_in_progress
    }
}

pub type SharedCapture = Arc<Mutex<CaptureState>>;

pub fn shared_capture(pre_roll_chunks: usize) -> SharedCapture {
    Arc::new(Mutex::new(CaptureState::new(pre_roll_chunks)))
}

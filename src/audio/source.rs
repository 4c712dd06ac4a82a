use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::chunk::AudioChunk;
use crate::error::AudioError;
use crate::sync::lock;

/// Parameters requested when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    pub sample_rate: u32,
    /// Samples per delivered chunk.
    pub chunk_len: usize,
}

impl SamplingConfig {
    pub fn from_voice(config: &crate::config::VoiceConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            chunk_len: config.chunk_len(),
        }
    }

    /// Same chunk duration at a different device rate.
    pub fn at_rate(self, rate: u32) -> Self {
        if rate == self.sample_rate || self.sample_rate == 0 {
            return Self {
                sample_rate: rate,
                ..self
            };
        }
        let scaled = self.chunk_len as u64 * rate as u64 / self.sample_rate as u64;
        Self {
            sample_rate: rate,
            chunk_len: (scaled as usize).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub u64);

/// The single consumer registered on a stream. Called on a thread the
/// source owns, once per chunk, in capture order. Must return quickly.
pub trait ChunkSink: Send {
    fn on_chunk(&mut self, chunk: AudioChunk);
}

impl<F> ChunkSink for F
where
    F: FnMut(AudioChunk) + Send,
{
    fn on_chunk(&mut self, chunk: AudioChunk) {
        self(chunk)
    }
}

/// A hardware (or simulated) audio input exposing independent logical streams.
///
/// `close` must not be called from inside the same stream's sink: it waits for
/// the in-flight callback to return.
pub trait AudioSource: Send + Sync {
    fn open_stream(
        &self,
        config: SamplingConfig,
        sink: Box<dyn ChunkSink>,
    ) -> Result<StreamHandle, AudioError>;

    fn start(&self, handle: StreamHandle) -> Result<(), AudioError>;

    fn pause(&self, handle: StreamHandle) -> Result<(), AudioError>;

    /// Closing an already closed stream is a no-op.
    fn close(&self, handle: StreamHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Paused,
    Running,
    Closed,
}

/// One logical stream: its run state plus its consumer.
pub struct StreamSlot {
    handle: StreamHandle,
    state: Mutex<StreamState>,
    sink: Mutex<Option<Box<dyn ChunkSink>>>,
}

impl StreamSlot {
    fn new(handle: StreamHandle, sink: Box<dyn ChunkSink>) -> Self {
        Self {
            handle,
            state: Mutex::new(StreamState::Paused),
            sink: Mutex::new(Some(sink)),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    fn set_running(&self, running: bool) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        if *state == StreamState::Closed {
            return Err(AudioError::UnknownStream(self.handle.0));
        }
        *state = if running {
            StreamState::Running
        } else {
            StreamState::Paused
        };
        Ok(())
    }

    /// Hands a chunk to the consumer if the stream is running.
    pub fn deliver(&self, chunk: AudioChunk) {
        if self.state() != StreamState::Running {
            return;
        }
        let mut sink = lock(&self.sink);
        // Close may have won the race while we waited for the sink.
        if self.state() != StreamState::Running {
            return;
        }
        if let Some(sink) = sink.as_mut() {
            sink.on_chunk(chunk);
        }
    }

    /// Marks the slot closed, then waits for any in-flight `deliver` before
    /// dropping the consumer. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == StreamState::Closed {
                return false;
            }
            *state = StreamState::Closed;
        }
        let mut sink = lock(&self.sink);
        sink.take();
        true
    }
}

/// Registry of logical streams shared by every `AudioSource` implementation.
#[derive(Default)]
pub struct StreamTable {
    next_id: AtomicU64,
    slots: Mutex<BTreeMap<StreamHandle, Arc<StreamSlot>>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sink: Box<dyn ChunkSink>) -> Arc<StreamSlot> {
        let handle = StreamHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let slot = Arc::new(StreamSlot::new(handle, sink));
        lock(&self.slots).insert(handle, Arc::clone(&slot));
        slot
    }

    pub fn get(&self, handle: StreamHandle) -> Result<Arc<StreamSlot>, AudioError> {
        lock(&self.slots)
            .get(&handle)
            .cloned()
            .ok_or(AudioError::UnknownStream(handle.0))
    }

    pub fn start(&self, handle: StreamHandle) -> Result<(), AudioError> {
        self.get(handle)?.set_running(true)
    }

    pub fn pause(&self, handle: StreamHandle) -> Result<(), AudioError> {
        self.get(handle)?.set_running(false)
    }

    /// Removes and closes the slot. Missing or closed handles are ignored.
    pub fn close(&self, handle: StreamHandle) -> bool {
        let slot = lock(&self.slots).remove(&handle);
        match slot {
            Some(slot) => slot.close(),
            None => {
                debug!(stream = handle.0, "close on unknown stream ignored");
                false
            }
        }
    }

    /// Slots in open order. The table lock is released before returning.
    pub fn slots(&self) -> Vec<Arc<StreamSlot>> {
        lock(&self.slots).values().cloned().collect()
    }

    pub fn handles(&self) -> Vec<StreamHandle> {
        lock(&self.slots).keys().copied().collect()
    }
}

/// Software audio source: chunks are pushed by hand and delivered to every
/// running stream on the caller's thread. Stands in for hardware in tests
/// and console-only runs.
#[derive(Default)]
pub struct FeedSource {
    table: StreamTable,
}

impl FeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, chunk: AudioChunk) {
        for slot in self.table.slots() {
            slot.deliver(chunk.clone());
        }
    }

    pub fn stream_state(&self, handle: StreamHandle) -> Option<StreamState> {
        self.table.get(handle).ok().map(|slot| slot.state())
    }

    pub fn open_count(&self) -> usize {
        self.table.handles().len()
    }
}

impl AudioSource for FeedSource {
    fn open_stream(
        &self,
        _config: SamplingConfig,
        sink: Box<dyn ChunkSink>,
    ) -> Result<StreamHandle, AudioError> {
        Ok(self.table.insert(sink).handle())
    }

    fn start(&self, handle: StreamHandle) -> Result<(), AudioError> {
        self.table.start(handle)
    }

    fn pause(&self, handle: StreamHandle) -> Result<(), AudioError> {
        self.table.pause(handle)
    }

    fn close(&self, handle: StreamHandle) {
        self.table.close(handle);
    }
}

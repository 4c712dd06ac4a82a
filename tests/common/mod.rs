#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use robot_voice::audio::{AudioChunk, AudioSource, FeedSource};
use robot_voice::config::VoiceConfig;
use robot_voice::engines::{
    ResponseGenerator, SpeechCompletion, SpeechToText, TextToSpeech, Turn, WakeWordEngine,
};
use robot_voice::kernel::telemetry::Telemetry;
use robot_voice::{Engines, VoicePipeline};

pub const RATE: u32 = 16_000;
/// 30 ms at 16 kHz.
pub const CHUNK: usize = 480;
pub const WAKE_MARKER: i16 = 12_345;
/// First sample that makes `MarkerWake` panic.
pub const PANIC_MARKER: i16 = -12_345;

/// About -21 dBFS, well above the default onset threshold.
pub fn loud() -> AudioChunk {
    AudioChunk::new(vec![3_000i16; CHUNK], RATE)
}

pub fn silence() -> AudioChunk {
    AudioChunk::new(vec![0i16; CHUNK], RATE)
}

/// Quiet chunk (below -50 dBFS) tagged with `tag` so chunks can be told apart.
pub fn hum(tag: i16) -> AudioChunk {
    AudioChunk::new(vec![tag.clamp(1, 60); CHUNK], RATE)
}

pub fn wake_chunk() -> AudioChunk {
    let mut samples = vec![0i16; CHUNK];
    samples[0] = WAKE_MARKER;
    AudioChunk::new(samples, RATE)
}

pub fn panic_chunk() -> AudioChunk {
    let mut samples = vec![0i16; CHUNK];
    samples[0] = PANIC_MARKER;
    AudioChunk::new(samples, RATE)
}

/// Takes one pending panic, if any are armed.
fn take_panic(armed: &AtomicUsize) -> bool {
    armed
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(2);

/// Blocks callers until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn opened() -> Arc<Self> {
        let gate = Gate::default();
        *gate.open.lock().unwrap() = true;
        Arc::new(gate)
    }

    pub fn closed() -> Arc<Self> {
        Arc::new(Gate::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

pub struct MarkerWake;

impl WakeWordEngine for MarkerWake {
    fn detect(&mut self, chunk: &AudioChunk) -> Result<bool> {
        if chunk.samples().first() == Some(&PANIC_MARKER) {
            panic!("wake model crashed");
        }
        Ok(chunk.samples().first() == Some(&WAKE_MARKER))
    }
}

pub struct ScriptedStt {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<usize>>,
    active: AtomicUsize,
    panics: AtomicUsize,
    pub max_active: AtomicUsize,
    pub gate: Arc<Gate>,
}

impl ScriptedStt {
    pub fn new(gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            panics: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate,
        })
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(anyhow!(message.to_string())));
    }

    /// The next call panics instead of replying.
    pub fn panic_next(&self) {
        self.panics.fetch_add(1, Ordering::SeqCst);
    }

    /// Sample counts of every call so far.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

impl SpeechToText for ScriptedStt {
    fn transcribe(&self, samples: &[f32], _language: &str) -> Result<String> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(samples.len());
        self.gate.wait();
        self.active.fetch_sub(1, Ordering::SeqCst);
        if take_panic(&self.panics) {
            panic!("speech model crashed");
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<(Vec<Turn>, String)>>,
    panics: AtomicUsize,
    pub gate: Arc<Gate>,
}

impl ScriptedGenerator {
    pub fn new(gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            panics: AtomicUsize::new(0),
            gate,
        })
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(anyhow!(message.to_string())));
    }

    pub fn panic_next(&self) {
        self.panics.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(Vec<Turn>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ResponseGenerator for ScriptedGenerator {
    fn generate(&self, history: &[Turn], text: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((history.to_vec(), text.to_string()));
        self.gate.wait();
        if take_panic(&self.panics) {
            panic!("language model crashed");
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("you said {}", text)))
    }
}

pub struct RecordingTts {
    spoken: Mutex<Vec<String>>,
    pending: Mutex<Vec<SpeechCompletion>>,
    auto_complete: bool,
    refuse: bool,
    panic: bool,
    pub cancels: AtomicUsize,
}

impl RecordingTts {
    /// Completes every utterance as soon as it starts.
    pub fn instant() -> Arc<Self> {
        Self::build(true, false, false)
    }

    /// Holds completions until `finish` is called.
    pub fn manual() -> Arc<Self> {
        Self::build(false, false, false)
    }

    pub fn refusing() -> Arc<Self> {
        Self::build(false, true, false)
    }

    /// Panics on every `speak`.
    pub fn panicking() -> Arc<Self> {
        Self::build(false, false, true)
    }

    fn build(auto_complete: bool, refuse: bool, panic: bool) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            auto_complete,
            refuse,
            panic,
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn finish(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for complete in pending {
            complete();
        }
    }
}

impl TextToSpeech for RecordingTts {
    fn speak(&self, text: &str, on_complete: SpeechCompletion) -> Result<()> {
        if self.refuse {
            return Err(anyhow!("audio output busy"));
        }
        if self.panic {
            panic!("audio driver crashed");
        }
        self.spoken.lock().unwrap().push(text.to_string());
        if self.auto_complete {
            on_complete();
        } else {
            self.pending.lock().unwrap().push(on_complete);
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }
}

pub struct Harness {
    pub pipeline: VoicePipeline,
    pub source: Arc<FeedSource>,
    pub stt: Arc<ScriptedStt>,
    pub generator: Arc<ScriptedGenerator>,
    pub tts: Arc<RecordingTts>,
    pub telemetry: Telemetry,
}

impl Harness {
    pub fn new(config: VoiceConfig) -> Self {
        Self::with(
            config,
            ScriptedStt::new(Gate::opened()),
            ScriptedGenerator::new(Gate::opened()),
            RecordingTts::instant(),
        )
    }

    pub fn with(
        config: VoiceConfig,
        stt: Arc<ScriptedStt>,
        generator: Arc<ScriptedGenerator>,
        tts: Arc<RecordingTts>,
    ) -> Self {
        let source = Arc::new(FeedSource::new());
        let dyn_source: Arc<dyn AudioSource> = source.clone();
        let telemetry = Telemetry::new();
        let engines = Engines {
            wake: Box::new(MarkerWake),
            stt: stt.clone(),
            generator: generator.clone(),
            tts: tts.clone(),
        };
        let pipeline = VoicePipeline::start(&config, dyn_source, engines, telemetry.clone())
            .expect("pipeline starts on a feed source");
        Self {
            pipeline,
            source,
            stt,
            generator,
            tts,
            telemetry,
        }
    }

    pub fn push(&self, chunk: AudioChunk) {
        self.source.push(chunk);
    }

    pub fn push_n(&self, n: usize, chunk: impl Fn() -> AudioChunk) {
        for _ in 0..n {
            self.source.push(chunk());
        }
    }

    pub fn wake(&self) {
        assert!(self.pipeline.request_wake(), "wake request should apply");
    }
}

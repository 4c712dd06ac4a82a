use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::audio::{shared_capture, Endpointer};
use super::cancel::Shutdown;
use super::coordinator::TurnCoordinator;
use super::routing::AudioRouting;
use super::state::{ConversationState, StateMachine};
use super::telemetry::Telemetry;
use super::transcription::TranscriptionWorker;
use super::wake::WakeListener;
use crate::audio::{AudioChunk, AudioSource, SamplingConfig, StreamHandle};
use crate::config::VoiceConfig;
use crate::engines::{ResponseGenerator, SpeechToText, TextToSpeech, WakeWordEngine};
use crate::error::VoiceError;

/// The external engines a pipeline drives.
pub struct Engines {
    pub wake: Box<dyn WakeWordEngine>,
    pub stt: Arc<dyn SpeechToText>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub tts: Arc<dyn TextToSpeech>,
}

/// The assembled voice core: one state machine, two logical audio streams,
/// the endpointer, the transcription worker and the turn coordinator.
pub struct VoicePipeline {
    source: Arc<dyn AudioSource>,
    machine: Arc<StateMachine>,
    endpointer: Arc<Endpointer>,
    worker: Arc<TranscriptionWorker>,
    coordinator: Arc<TurnCoordinator>,
    telemetry: Telemetry,
    shutdown: Shutdown,
    phrase_stream: StreamHandle,
    wake_stream: StreamHandle,
    shutdown_timeout: Duration,
    stopped: AtomicBool,
}

impl VoicePipeline {
    /// Wires everything together and starts in `Standby` with the wake
    /// stream running.
    pub fn start(
        config: &VoiceConfig,
        source: Arc<dyn AudioSource>,
        engines: Engines,
        telemetry: Telemetry,
    ) -> Result<Self, VoiceError> {
        Self::start_with_shutdown(config, source, engines, telemetry, Shutdown::new())
    }

    /// Like `start`, sharing `shutdown` with engines that run their own
    /// background threads so `shutdown()` cancels and joins those too.
    pub fn start_with_shutdown(
        config: &VoiceConfig,
        source: Arc<dyn AudioSource>,
        engines: Engines,
        telemetry: Telemetry,
        shutdown: Shutdown,
    ) -> Result<Self, VoiceError> {
        config.validate()?;

        let machine = Arc::new(StateMachine::with_telemetry(telemetry.clone()));
        let shared = shared_capture(config.pre_roll_chunks());

        let worker = Arc::new(TranscriptionWorker::new(
            config,
            Arc::clone(&shared),
            engines.stt,
            telemetry.clone(),
            shutdown.clone(),
        ));
        let coordinator = TurnCoordinator::new(
            config,
            Arc::clone(&machine),
            engines.generator,
            engines.tts,
            telemetry.clone(),
            shutdown.clone(),
        );
        worker.set_listener(coordinator.clone());

        let endpointer = Arc::new(Endpointer::new(
            config,
            shared,
            Arc::clone(&worker),
            Arc::clone(&machine),
            telemetry.clone(),
        ));

        let sampling = SamplingConfig::from_voice(config);
        let sink = Arc::clone(&endpointer);
        let phrase_stream = source.open_stream(sampling, Box::new(move |chunk: AudioChunk| sink.process(chunk)))?;
        let wake = WakeListener::new(engines.wake, Arc::clone(&machine));
        let wake_stream = match source.open_stream(sampling, Box::new(wake)) {
            Ok(handle) => handle,
            Err(e) => {
                source.close(phrase_stream);
                return Err(e.into());
            }
        };

        machine.subscribe(Arc::new(telemetry.clone()));
        machine.subscribe(Arc::new(AudioRouting::new(
            Arc::clone(&source),
            phrase_stream,
            wake_stream,
            Arc::clone(&endpointer),
        )));

        if let Err(e) = source.start(wake_stream) {
            source.close(phrase_stream);
            source.close(wake_stream);
            return Err(e.into());
        }
        telemetry.state(ConversationState::Standby);
        info!(
            sample_rate = sampling.sample_rate,
            chunk_len = sampling.chunk_len,
            "Voice pipeline started in standby"
        );

        Ok(Self {
            source,
            machine,
            endpointer,
            worker,
            coordinator,
            telemetry,
            shutdown,
            phrase_stream,
            wake_stream,
            shutdown_timeout: config.shutdown_timeout(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    pub fn machine(&self) -> &Arc<StateMachine> {
        &self.machine
    }

    pub fn endpointer(&self) -> &Arc<Endpointer> {
        &self.endpointer
    }

    pub fn worker(&self) -> &Arc<TranscriptionWorker> {
        &self.worker
    }

    pub fn coordinator(&self) -> &Arc<TurnCoordinator> {
        &self.coordinator
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn request_wake(&self) -> bool {
        self.coordinator.request_wake()
    }

    pub fn request_sleep(&self) -> bool {
        self.coordinator.request_sleep()
    }

    /// Stops audio delivery, cancels speech and waits a bounded time for
    /// background work. Safe to call more than once.
    pub fn shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }
        info!("Shutting down voice pipeline");
        self.shutdown.cancel();
        self.source.close(self.wake_stream);
        self.source.close(self.phrase_stream);
        self.coordinator.shutdown();

        let joined = self.shutdown.join(self.shutdown_timeout);
        if !joined {
            warn!(timeout_secs = self.shutdown_timeout.as_secs_f32(), "Background work still running at shutdown");
        }
        joined
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

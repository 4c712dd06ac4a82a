//! Telemetry for the voice core.
//!
//! Telemetry is a read-only side channel. It is never read by transition,
//! endpointing, or turn logic, and an absent sink changes nothing.
//!
//! The recorder only keeps content-free events (states, counts, durations).
//! Transcript and response text reach sinks through `TelemetryFrame` only.

pub mod event;
pub mod metrics;
pub mod recorder;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{error, trace, Level};

pub use event::{DiscardReason, TelemetryEvent, TurnStage};
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;

use super::event::{StateObserver, Transition};
use super::state::ConversationState;
use crate::sync::lock;

/// What external dashboards see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    pub state: ConversationState,
    pub audio_level_db: f32,
    pub last_transcript: Option<String>,
    pub last_response: Option<String>,
}

impl Default for TelemetryFrame {
    fn default() -> Self {
        Self {
            state: ConversationState::Standby,
            audio_level_db: crate::audio::DB_FLOOR,
            last_transcript: None,
            last_response: None,
        }
    }
}

/// Receives a frame on every state change and level update.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, frame: &TelemetryFrame);
}

/// Writes frames as JSON through `tracing` at trace level.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&self, frame: &TelemetryFrame) {
        if !tracing::enabled!(target: "robot_voice::telemetry", Level::TRACE) {
            return;
        }
        match serde_json::to_string(frame) {
            Ok(json) => trace!(target: "robot_voice::telemetry", "{}", json),
            Err(e) => trace!(target: "robot_voice::telemetry", "unserializable frame: {}", e),
        }
    }
}

#[derive(Default)]
struct TelemetryInner {
    frame: Mutex<TelemetryFrame>,
    sinks: RwLock<Vec<Arc<dyn TelemetrySink>>>,
    recorder: Mutex<TelemetryRecorder>,
}

/// Shared telemetry hub. Cheap to clone; every clone feeds the same sinks.
#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Arc<TelemetryInner>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn TelemetrySink>) {
        self.inner
            .sinks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(sink);
    }

    pub fn level(&self, db: f32) {
        let frame = {
            let mut frame = lock(&self.inner.frame);
            frame.audio_level_db = db;
            frame.clone()
        };
        self.publish(&frame);
    }

    pub fn state(&self, state: ConversationState) {
        let frame = {
            let mut frame = lock(&self.inner.frame);
            frame.state = state;
            frame.clone()
        };
        self.publish(&frame);
    }

    pub fn transcript(&self, text: &str) {
        lock(&self.inner.frame).last_transcript = Some(text.to_string());
    }

    pub fn response(&self, text: &str) {
        lock(&self.inner.frame).last_response = Some(text.to_string());
    }

    pub fn record(&self, event: TelemetryEvent) {
        lock(&self.inner.recorder).record(event);
    }

    pub fn frame(&self) -> TelemetryFrame {
        lock(&self.inner.frame).clone()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        lock(&self.inner.recorder).snapshot()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.inner.recorder).events().cloned().collect()
    }

    fn publish(&self, frame: &TelemetryFrame) {
        let sinks: Vec<_> = self
            .inner
            .sinks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        for sink in sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.publish(frame))).is_err() {
                error!("telemetry sink panicked");
            }
        }
    }
}

impl StateObserver for Telemetry {
    fn on_transition(&self, transition: &Transition) -> anyhow::Result<()> {
        self.record(TelemetryEvent::StateTransition {
            from: transition.from,
            to: transition.to,
            trigger: transition.trigger,
        });
        self.state(transition.to);
        Ok(())
    }
}

use std::collections::VecDeque;

use serde::Serialize;

use super::event::{DiscardReason, TelemetryEvent};
use crate::kernel::state::ConversationState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub phrase_stats: PhraseStats,
    pub transcription_stats: TranscriptionStats,
    pub turn_stats: TurnStats,
    pub transitions: u64,
    pub wakeups: u64,
    pub races_dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhraseStats {
    pub emitted: u64,
    pub discarded_no_voice: u64,
    pub discarded_too_short: u64,
    pub discarded_stopped: u64,
    pub rejected: u64,
    pub avg_voiced_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptionStats {
    pub completed: u64,
    pub empty: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnStats {
    pub completed: u64,
    pub abandoned: u64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    let mut voiced_total = 0u64;
    let mut latency_total = 0u64;

    for event in events {
        match event {
            TelemetryEvent::StateTransition { from, to, .. } => {
                snap.transitions += 1;
                if *from == ConversationState::Standby && *to == ConversationState::Listening {
                    snap.wakeups += 1;
                }
            }
            TelemetryEvent::RaceDropped { .. } => snap.races_dropped += 1,
            TelemetryEvent::PhraseEmitted { voiced_ms, .. } => {
                snap.phrase_stats.emitted += 1;
                voiced_total += voiced_ms;
            }
            TelemetryEvent::PhraseDiscarded { reason } => match reason {
                DiscardReason::NoVoice => snap.phrase_stats.discarded_no_voice += 1,
                DiscardReason::TooShort => snap.phrase_stats.discarded_too_short += 1,
                DiscardReason::Stopped => snap.phrase_stats.discarded_stopped += 1,
            },
            TelemetryEvent::SubmissionRejected => snap.phrase_stats.rejected += 1,
            TelemetryEvent::TranscriptionCompleted { latency_ms, empty } => {
                snap.transcription_stats.completed += 1;
                latency_total += latency_ms;
                if *empty {
                    snap.transcription_stats.empty += 1;
                }
            }
            TelemetryEvent::TranscriptionFailed => snap.transcription_stats.failed += 1,
            TelemetryEvent::TurnCompleted => snap.turn_stats.completed += 1,
            TelemetryEvent::TurnAbandoned { .. } => snap.turn_stats.abandoned += 1,
        }
    }

    if snap.phrase_stats.emitted > 0 {
        snap.phrase_stats.avg_voiced_ms = voiced_total as f64 / snap.phrase_stats.emitted as f64;
    }

    if snap.transcription_stats.completed > 0 {
        snap.transcription_stats.avg_latency_ms =
            latency_total as f64 / snap.transcription_stats.completed as f64;
    }

    snap
}

mod common;

use common::*;
use robot_voice::audio::AudioChunk;
use robot_voice::config::VoiceConfig;
use robot_voice::kernel::audio::EndpointerState;
use robot_voice::ConversationState;

#[test]
fn test_pre_roll_is_bounded() {
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();

    // Whole 30 ms chunks within 1.0 s.
    let capacity = VoiceConfig::default().pre_roll_chunks();
    assert_eq!(capacity, 33);

    for i in 0..100 {
        harness.push(hum(1 + (i % 50) as i16));
    }

    let snapshot = harness.pipeline.endpointer().snapshot();
    assert_eq!(snapshot.state, EndpointerState::Idle);
    assert_eq!(snapshot.pre_roll.len(), capacity);
    assert!(snapshot.phrase.is_empty());
}

#[test]
fn test_onset_seeds_phrase_with_pre_roll() {
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();

    for i in 0..40 {
        harness.push(hum(1 + i as i16));
    }
    let before = harness.pipeline.endpointer().snapshot();

    let onset = loud();
    harness.push(onset.clone());
    let after = harness.pipeline.endpointer().snapshot();

    assert_eq!(after.state, EndpointerState::Buffering);
    let mut expected = before.pre_roll.clone();
    expected.push(onset);
    assert_eq!(after.phrase, expected, "phrase starts with the pre-roll, oldest first");
    println!("Pre-roll seeded phrase: {} chunks", after.phrase.len());
}

#[test]
fn test_no_onset_while_quiet() {
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();
    harness.push_n(200, silence);

    let snapshot = harness.pipeline.endpointer().snapshot();
    assert_eq!(snapshot.state, EndpointerState::Idle);
    assert!(harness.stt.calls().is_empty());
}

#[test]
fn test_short_phrase_is_discarded() {
    // 0.3 s of speech then 1.2 s of silence: below the 0.5 s minimum.
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();

    harness.push_n(10, loud);
    harness.push_n(40, silence);

    let snapshot = harness.pipeline.endpointer().snapshot();
    assert_eq!(snapshot.state, EndpointerState::Idle);
    assert!(!snapshot.transcription_in_progress);
    assert!(harness.stt.calls().is_empty(), "short phrase never reaches the engine");
    assert_eq!(harness.pipeline.state(), ConversationState::Listening);
    assert_eq!(harness.telemetry.snapshot().phrase_stats.discarded_too_short, 1);
}

#[test]
fn test_phrase_ends_after_trailing_silence() {
    // 1.0 s of speech then 1.2 s of silence: exactly one submission.
    let harness = Harness::new(VoiceConfig::default());
    harness.stt.reply("hello robot");
    harness.wake();

    harness.push_n(10, silence);
    harness.push_n(34, loud);
    harness.push_n(40, silence);

    assert!(wait_until(WAIT, || harness.stt.calls().len() == 1));
    // 10 pre-roll + 34 voiced + 34 silent chunks (1.02 s >= 1.0 s timeout).
    assert_eq!(harness.stt.calls(), vec![78 * CHUNK]);

    assert!(wait_until(WAIT, || harness.tts.spoken().len() == 1));
    assert!(wait_until(WAIT, || harness.pipeline.state() == ConversationState::Listening));
    assert_eq!(harness.stt.calls().len(), 1);
    println!("Phrase emitted and turn completed");
}

#[test]
fn test_two_second_phrase_keeps_one_second_of_trailing_silence() {
    // 2.0 s of speech then 1.5 s of silence: one submission of about 3.0 s.
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();

    harness.push_n(67, loud);
    harness.push_n(50, silence);

    assert!(wait_until(WAIT, || harness.stt.calls().len() == 1));
    let samples = harness.stt.calls()[0];
    assert_eq!(samples, (67 + 34) * CHUNK);
    let seconds = samples as f32 / RATE as f32;
    assert!((seconds - 3.0).abs() < 0.1, "phrase was {}s", seconds);
    assert_eq!(harness.telemetry.snapshot().phrase_stats.emitted, 1);
}

#[test]
fn test_silence_resets_on_voice() {
    // Gaps shorter than the phrase timeout keep one phrase going.
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();

    for _ in 0..3 {
        harness.push_n(10, loud);
        harness.push_n(20, silence);
    }
    let snapshot = harness.pipeline.endpointer().snapshot();
    assert_eq!(snapshot.state, EndpointerState::Buffering);
    assert!(harness.stt.calls().is_empty());
}

#[test]
fn test_idle_timeout_returns_to_standby() {
    let config = VoiceConfig {
        phrase_timeout_seconds: 0.3,
        idle_timeout_seconds: 0.6,
        ..VoiceConfig::default()
    };
    let harness = Harness::new(config);
    harness.wake();

    harness.push_n(19, silence);
    assert_eq!(harness.pipeline.state(), ConversationState::Listening);
    harness.push_n(2, silence);
    assert_eq!(harness.pipeline.state(), ConversationState::Standby);
    assert!(!harness.pipeline.endpointer().is_enabled());
}

#[test]
fn test_idle_timeout_waits_for_transcription() {
    let config = VoiceConfig {
        phrase_timeout_seconds: 0.3,
        idle_timeout_seconds: 0.6,
        min_phrase_duration_seconds: 0.1,
        ..VoiceConfig::default()
    };
    let gate = Gate::closed();
    let harness = Harness::with(
        config,
        ScriptedStt::new(gate.clone()),
        ScriptedGenerator::new(Gate::opened()),
        RecordingTts::instant(),
    );
    harness.wake();

    harness.push_n(10, loud);
    harness.push_n(11, silence);
    assert!(wait_until(WAIT, || harness.stt.calls().len() == 1));
    assert!(harness.pipeline.worker().is_transcribing());

    // Well past the idle timeout while the engine is still working.
    harness.push_n(40, silence);
    assert_eq!(harness.pipeline.state(), ConversationState::Listening);

    gate.open();
    assert!(wait_until(WAIT, || !harness.pipeline.worker().is_transcribing()));
    assert_eq!(harness.pipeline.state(), ConversationState::Listening);

    harness.push(silence());
    assert_eq!(harness.pipeline.state(), ConversationState::Standby);
    println!("Idle timeout deferred until transcription finished");
}

#[test]
fn test_leaving_listening_discards_partial_phrase() {
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();
    harness.push_n(20, loud);
    assert_eq!(
        harness.pipeline.endpointer().snapshot().state,
        EndpointerState::Buffering
    );

    assert!(harness.pipeline.request_sleep());
    let snapshot = harness.pipeline.endpointer().snapshot();
    assert_eq!(snapshot.state, EndpointerState::Idle);
    assert!(!snapshot.enabled);

    harness.push_n(40, silence);
    assert!(harness.stt.calls().is_empty());
    assert_eq!(harness.telemetry.snapshot().phrase_stats.discarded_stopped, 1);
}

#[test]
fn test_wake_word_switches_streams() {
    let harness = Harness::new(VoiceConfig::default());
    harness.push_n(50, loud);
    assert_eq!(harness.pipeline.state(), ConversationState::Standby);
    assert!(harness.pipeline.endpointer().snapshot().phrase.is_empty());

    harness.push(wake_chunk());
    assert_eq!(harness.pipeline.state(), ConversationState::Listening);
    assert!(harness.pipeline.endpointer().is_enabled());

    harness.push(loud());
    assert_eq!(
        harness.pipeline.endpointer().snapshot().state,
        EndpointerState::Buffering
    );
}

#[test]
fn test_wake_engine_panic_keeps_stream_alive() {
    let harness = Harness::new(VoiceConfig::default());
    harness.push(panic_chunk());
    harness.push(panic_chunk());
    harness.push(silence());
    assert_eq!(harness.pipeline.state(), ConversationState::Standby);

    harness.push(wake_chunk());
    assert_eq!(harness.pipeline.state(), ConversationState::Listening);
    println!("Wake stream survived engine panics");
}

#[test]
fn test_level_is_published() {
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();
    harness.push(silence());
    assert!(harness.telemetry.frame().audio_level_db <= -100.0);
    harness.push(loud());
    let db = harness.telemetry.frame().audio_level_db;
    assert!(db > -25.0 && db < -15.0, "level was {}", db);
}

#[test]
fn test_device_rate_phrase_is_resampled_for_recognition() {
    // A 48 kHz device keeps 30 ms chunks; the engine still receives 16 kHz.
    let harness = Harness::new(VoiceConfig::default());
    harness.wake();

    let device_chunk = 1_440;
    let loud_48k = || AudioChunk::new(vec![3_000i16; device_chunk], 48_000);
    let silence_48k = || AudioChunk::new(vec![0i16; device_chunk], 48_000);
    harness.push_n(34, loud_48k);
    harness.push_n(40, silence_48k);

    assert!(wait_until(WAIT, || harness.stt.calls().len() == 1));
    assert_eq!(harness.stt.calls(), vec![(34 + 34) * CHUNK]);
    println!("48 kHz phrase delivered at the engine rate");
}

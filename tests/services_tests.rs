mod common;

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{wait_until, Gate, ScriptedStt, WAIT};
use robot_voice::engines::{ResponseGenerator, SpeechToText, TextToSpeech, Turn, WakeWordEngine};
use robot_voice::kernel::cancel::Shutdown;
use robot_voice::services::llm::client::build_prompt;
use robot_voice::services::stt::samples_to_wav;
use robot_voice::services::{CommandSpeaker, LlmResponder, SpokenWakeWord};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

#[test]
fn test_prompt_includes_history_in_order() {
    let history = vec![
        Turn {
            recognized_text: "hi".into(),
            response_text: "Hello!".into(),
        },
        Turn {
            recognized_text: "how are you".into(),
            response_text: "Fully charged.".into(),
        },
    ];
    let prompt = build_prompt(&history, "tell me a joke");

    assert!(prompt.starts_with("System: "));
    let first = prompt.find("User: hi\nAssistant: Hello!").unwrap();
    let second = prompt.find("User: how are you\nAssistant: Fully charged.").unwrap();
    assert!(first < second);
    assert!(prompt.ends_with("User: tell me a joke\nAssistant:"));
}

#[test]
fn test_wav_encoding() {
    let wav = samples_to_wav(&[0.0, 0.5, -1.0, 2.0], 16_000).unwrap();
    let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 16_000);
    assert_eq!(spec.bits_per_sample, 16);

    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples, vec![0, 16_383, -32_767, 32_767]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_llm_unreachable_is_an_error() {
    let responder = LlmResponder::new("http://127.0.0.1:9/", Duration::from_secs(2), Handle::current());
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(responder.generate(&[], "hello").is_err());
    });
    let failed = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("generate returns within the timeout")
        .unwrap();
    assert!(failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_command_speaker_completes() {
    let speaker = CommandSpeaker::new("echo", Handle::current()).unwrap();
    let (tx, rx) = oneshot::channel();
    speaker
        .speak(
            "hello",
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("completion fires when the command exits")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_command_speaker_cancel_kills_and_completes() {
    let speaker = CommandSpeaker::new("sleep", Handle::current()).unwrap();
    let (tx, rx) = oneshot::channel();
    let started = Instant::now();
    speaker
        .speak(
            "30",
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .unwrap();

    speaker.cancel();
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("cancel fires the completion")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_command_speaker_rejects_empty_command() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    assert!(CommandSpeaker::new("   ", runtime.handle().clone()).is_err());
}

struct EchoStt(&'static str);

impl SpeechToText for EchoStt {
    fn transcribe(&self, _samples: &[f32], _language: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

fn chunk(amplitude: i16) -> robot_voice::audio::AudioChunk {
    robot_voice::audio::AudioChunk::new(vec![amplitude; 480], 16_000)
}

/// Feeds one candidate utterance, then polls until a verdict arrives.
fn listen(wake: &mut SpokenWakeWord) -> bool {
    for _ in 0..20 {
        assert!(!wake.detect(&chunk(3_000)).unwrap());
    }
    for _ in 0..20 {
        if wake.detect(&chunk(0)).unwrap() {
            return true;
        }
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if wake.detect(&chunk(0)).unwrap() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_spoken_wake_word_matches_transcript() {
    let stt = Arc::new(EchoStt("Hey, robot! Are you there?"));
    let mut wake = SpokenWakeWord::new(stt, vec!["Hey Robot".into(), "hey, robot".into()], "en", -50.0, Shutdown::new());
    assert!(listen(&mut wake));
}

#[test]
fn test_spoken_wake_word_ignores_other_speech() {
    let stt = Arc::new(EchoStt("what is the weather"));
    let mut wake = SpokenWakeWord::new(stt, vec!["hey robot".into()], "en", -50.0, Shutdown::new());
    assert!(!listen(&mut wake));
}

#[test]
fn test_spoken_wake_word_skips_short_noise() {
    let stt = Arc::new(EchoStt("hey robot"));
    let mut wake = SpokenWakeWord::new(stt, vec!["hey robot".into()], "en", -50.0, Shutdown::new());
    // 60 ms of noise is below the minimum candidate length.
    for _ in 0..2 {
        assert!(!wake.detect(&chunk(3_000)).unwrap());
    }
    for _ in 0..40 {
        assert!(!wake.detect(&chunk(0)).unwrap());
    }
    std::thread::sleep(Duration::from_millis(50));
    assert!(!wake.detect(&chunk(0)).unwrap());
}

#[test]
fn test_wake_checks_are_joined_by_shutdown() {
    let gate = Gate::closed();
    let stt = ScriptedStt::new(gate.clone());
    let shutdown = Shutdown::new();
    let mut wake = SpokenWakeWord::new(stt.clone(), vec!["hey robot".into()], "en", -50.0, shutdown.clone());

    for _ in 0..20 {
        assert!(!wake.detect(&chunk(3_000)).unwrap());
    }
    for _ in 0..20 {
        assert!(!wake.detect(&chunk(0)).unwrap());
    }
    assert!(wait_until(WAIT, || stt.calls().len() == 1));

    shutdown.cancel();
    assert!(!shutdown.join(Duration::from_millis(50)), "check thread should still be blocked");
    gate.open();
    assert!(shutdown.join(Duration::from_secs(2)));

    // No new checks start once cancelled.
    for _ in 0..20 {
        wake.detect(&chunk(3_000)).unwrap();
    }
    for _ in 0..40 {
        wake.detect(&chunk(0)).unwrap();
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stt.calls().len(), 1);
    println!("Wake check thread joined on shutdown");
}

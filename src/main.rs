use std::sync::Arc;

use anyhow::Context;
use robot_voice::audio::{AudioSource, CpalAudioSource, FeedSource};
use robot_voice::config::AppConfig;
use robot_voice::engines::SpeechToText;
use robot_voice::kernel::cancel::Shutdown;
use robot_voice::kernel::telemetry::{LogSink, Telemetry};
use robot_voice::kernel::transcription::{Transcript, TranscriptListener};
use robot_voice::services::{CommandSpeaker, LlmResponder, SpokenWakeWord, WhisperServerTranscriber};
use robot_voice::{Engines, VoiceError, VoicePipeline};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

enum Command {
    Wake,
    Sleep,
    Status,
    Quit,
    /// Anything else is handled as if it had been heard.
    Say(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line.to_lowercase().as_str() {
            "wake" => Command::Wake,
            "sleep" => Command::Sleep,
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            _ => Command::Say(line.to_string()),
        })
    }
}

fn build_engines(config: &AppConfig, shutdown: &Shutdown) -> anyhow::Result<Engines> {
    let services = &config.services;
    let runtime = Handle::current();
    let stt: Arc<dyn SpeechToText> = Arc::new(WhisperServerTranscriber::new(
        services.whisper_url.as_str(),
        services.request_timeout(),
        runtime.clone(),
    ));
    Ok(Engines {
        wake: Box::new(SpokenWakeWord::new(
            Arc::clone(&stt),
            services.wake_words.clone(),
            config.voice.language.as_str(),
            config.voice.onset_threshold_db,
            shutdown.clone(),
        )),
        stt,
        generator: Arc::new(LlmResponder::new(
            services.llm_url.as_str(),
            services.request_timeout(),
            runtime.clone(),
        )),
        tts: Arc::new(CommandSpeaker::new(&services.tts_command, runtime)?),
    })
}

fn start_pipeline(config: &AppConfig, telemetry: &Telemetry) -> anyhow::Result<VoicePipeline> {
    let source: Arc<dyn AudioSource> = match CpalAudioSource::open_default() {
        Ok(source) => Arc::new(source),
        Err(e) => {
            tracing::warn!("{}; running console-only", e);
            Arc::new(FeedSource::new())
        }
    };

    let shutdown = Shutdown::new();
    let engines = build_engines(config, &shutdown)?;
    match VoicePipeline::start_with_shutdown(&config.voice, source, engines, telemetry.clone(), shutdown) {
        Ok(pipeline) => Ok(pipeline),
        Err(VoiceError::DeviceUnavailable(e)) => {
            tracing::warn!("{}; running console-only", e);
            let source: Arc<dyn AudioSource> = Arc::new(FeedSource::new());
            let shutdown = Shutdown::new();
            let engines = build_engines(config, &shutdown)?;
            Ok(VoicePipeline::start_with_shutdown(
                &config.voice,
                source,
                engines,
                telemetry.clone(),
                shutdown,
            )?)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_status(pipeline: &VoicePipeline) {
    let frame = pipeline.telemetry().frame();
    let snapshot = pipeline.telemetry().snapshot();
    println!("state: {:?}", pipeline.state());
    match serde_json::to_string_pretty(&frame) {
        Ok(json) => println!("frame: {}", json),
        Err(e) => tracing::warn!("frame not serializable: {}", e),
    }
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("metrics: {}", json),
        Err(e) => tracing::warn!("metrics not serializable: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber")?;

    let config = match std::env::var("ROBOT_VOICE_CONFIG") {
        Ok(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => AppConfig::default(),
    };
    tracing::info!("Robot voice core booting...");

    let telemetry = Telemetry::new();
    telemetry.add_sink(Arc::new(LogSink));
    let pipeline = start_pipeline(&config, &telemetry)?;

    let token = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);

    let reader_token = token.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Commands: wake, sleep, status, quit. Any other line is handled as speech.");
        loop {
            let line = tokio::select! {
                _ = reader_token.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    let Some(command) = Command::parse(&line) else {
                        continue;
                    };
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl-C received");
                break;
            }
            command = rx.recv() => match command {
                Some(Command::Wake) => {
                    if !pipeline.request_wake() {
                        println!("already awake ({:?})", pipeline.state());
                    }
                }
                Some(Command::Sleep) => {
                    if !pipeline.request_sleep() {
                        println!("already in standby");
                    }
                }
                Some(Command::Status) => print_status(&pipeline),
                Some(Command::Say(text)) => {
                    tracing::info!("Console Input Dispatched: '{}'", text);
                    pipeline
                        .coordinator()
                        .on_transcript(Uuid::new_v4(), Ok(Transcript::Text(text)));
                }
                Some(Command::Quit) | None => break,
            }
        }
    }

    token.cancel();
    let clean = tokio::task::block_in_place(|| pipeline.shutdown());
    if !clean {
        tracing::warn!("Exited with background work still running");
    }
    Ok(())
}

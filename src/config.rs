use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Upper bound for every duration setting.
const MAX_SECONDS: f32 = 3600.0;
const MAX_SAMPLE_RATE: u32 = 384_000;

fn check_seconds(name: &str, value: f32, allow_zero: bool) -> Result<(), ConfigError> {
    let in_range = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !in_range || value > MAX_SECONDS {
        let lower = if allow_zero { "[0" } else { "(0" };
        return Err(ConfigError::Invalid(format!(
            "{} must be in {}, {}] seconds, got {}",
            name, lower, MAX_SECONDS, value
        )));
    }
    Ok(())
}

/// What to do with a phrase that completes while another is still being transcribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    #[default]
    Reject,
    /// Hold one pending phrase and run it right after the in-flight one.
    Queue,
}

/// Tuning of the listening pipeline. Microphone gain varies by hardware,
/// so every threshold lives here instead of in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceConfig {
    pub onset_threshold_db: f32,
    pub phrase_timeout_seconds: f32,
    pub idle_timeout_seconds: f32,
    pub pre_roll_seconds: f32,
    pub min_phrase_duration_seconds: f32,
    pub sample_rate: u32,
    /// Case-insensitive exact match short-circuits to standby.
    pub stop_phrase: String,
    pub chunk_millis: u32,
    pub language: String,
    pub overlap_policy: OverlapPolicy,
    pub history_turns: usize,
    pub shutdown_timeout_seconds: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            onset_threshold_db: -50.0,
            phrase_timeout_seconds: 1.0,
            idle_timeout_seconds: 20.0,
            pre_roll_seconds: 1.0,
            min_phrase_duration_seconds: 0.5,
            sample_rate: 16_000,
            stop_phrase: "stop listening".to_string(),
            chunk_millis: 30,
            language: "en".to_string(),
            overlap_policy: OverlapPolicy::Reject,
            history_turns: 6,
            shutdown_timeout_seconds: 2.0,
        }
    }
}

impl VoiceConfig {
    pub fn phrase_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.phrase_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.idle_timeout_seconds)
    }

    pub fn min_phrase_duration(&self) -> Duration {
        Duration::from_secs_f32(self.min_phrase_duration_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.shutdown_timeout_seconds)
    }

    /// Samples per chunk at the configured rate.
    pub fn chunk_len(&self) -> usize {
        (self.sample_rate as usize * self.chunk_millis as usize) / 1000
    }

    /// Whole chunks that fit in `pre_roll_seconds`, so the pre-roll never
    /// holds more audio than configured.
    pub fn pre_roll_chunks(&self) -> usize {
        if self.chunk_millis == 0 {
            return 0;
        }
        let millis = (self.pre_roll_seconds * 1000.0).max(0.0);
        // Absorbs f32 rounding just below a whole chunk.
        ((millis + 1e-3) / self.chunk_millis as f32).floor() as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "sampleRate must be in 1..={}",
                MAX_SAMPLE_RATE
            )));
        }
        if self.chunk_len() == 0 || self.chunk_millis > 1000 {
            return Err(ConfigError::Invalid(format!(
                "chunkMillis {} must yield non-empty chunks of at most 1s at {}Hz",
                self.chunk_millis, self.sample_rate
            )));
        }
        if !self.onset_threshold_db.is_finite() {
            return Err(ConfigError::Invalid("onsetThresholdDb must be finite".into()));
        }
        check_seconds("phraseTimeoutSeconds", self.phrase_timeout_seconds, false)?;
        check_seconds("idleTimeoutSeconds", self.idle_timeout_seconds, false)?;
        check_seconds("preRollSeconds", self.pre_roll_seconds, true)?;
        check_seconds("minPhraseDurationSeconds", self.min_phrase_duration_seconds, true)?;
        check_seconds("shutdownTimeoutSeconds", self.shutdown_timeout_seconds, false)?;
        if self.idle_timeout_seconds <= self.phrase_timeout_seconds {
            return Err(ConfigError::Invalid(
                "idleTimeoutSeconds must exceed phraseTimeoutSeconds".into(),
            ));
        }
        Ok(())
    }
}

/// Endpoints of the external engines used by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServicesConfig {
    pub llm_url: String,
    pub whisper_url: String,
    pub tts_command: String,
    /// Matched anywhere in a transcribed candidate, case-insensitively.
    pub wake_words: Vec<String>,
    pub request_timeout_seconds: f32,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            llm_url: "http://localhost:8080".to_string(),
            whisper_url: "http://localhost:8081".to_string(),
            tts_command: "say".to_string(),
            wake_words: vec!["hey robot".to_string()],
            request_timeout_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub voice: VoiceConfig,
    pub services: ServicesConfig,
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("requestTimeoutSeconds", self.request_timeout_seconds, false)
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(raw)?;
        config.voice.validate()?;
        config.services.validate()?;
        Ok(config)
    }
}

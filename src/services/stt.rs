use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{multipart, Client};
use serde::Deserialize;
use tokio::runtime::Handle;

use crate::engines::SpeechToText;

/// Encodes mono f32 samples as 16-bit PCM WAV.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("creating wav writer")?;
        for &sample in samples {
            let sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Speech-to-text through a whisper.cpp server (`POST /inference`).
///
/// Like the other HTTP services, requests run on `runtime` and the trait call
/// blocks a thread outside it.
pub struct WhisperServerTranscriber {
    client: Client,
    base_url: String,
    runtime: Handle,
}

#[derive(Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    text: String,
}

impl WhisperServerTranscriber {
    pub fn new(base_url: impl Into<String>, timeout: Duration, runtime: Handle) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            runtime,
        }
    }

    pub async fn inference(&self, wav: Vec<u8>, language: &str) -> Result<String> {
        let part = multipart::Part::bytes(wav)
            .file_name("phrase.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("response_format", "json")
            .text("language", language.to_string());

        let response = self
            .client
            .post(format!("{}/inference", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("whisper server error {}: {}", status, body));
        }

        let body: InferenceResponse = response.json().await?;
        Ok(body.text.trim().to_string())
    }
}

impl SpeechToText for WhisperServerTranscriber {
    fn transcribe(&self, samples: &[f32], language: &str) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }

        let wav = samples_to_wav(samples, self.sample_rate())?;
        self.runtime.block_on(self.inference(wav, language))
    }
}

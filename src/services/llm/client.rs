use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;

use crate::engines::{ResponseGenerator, Turn};

const SYSTEM_PROMPT: &str = "You are a small friendly robot talking out loud. Answer in one or two short spoken sentences. No lists, no markup.";

/// Response generator backed by llama-server's `/completion` endpoint.
///
/// Requests run on `runtime`; `generate` blocks the calling thread, so it must
/// not be called from inside that runtime.
#[derive(Clone)]
pub struct LlmResponder {
    client: Client,
    base_url: String,
    runtime: Handle,
}

#[derive(Serialize)]
struct CompletionRequest {
    prompt: String,
    stream: bool,
    n_predict: usize,
    temperature: f32,
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

impl LlmResponder {
    pub fn new(base_url: impl Into<String>, timeout: Duration, runtime: Handle) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout) // hard timeout at the network level
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            runtime,
        }
    }

    pub async fn complete(&self, history: &[Turn], text: &str) -> Result<String> {
        let request_body = CompletionRequest {
            prompt: build_prompt(history, text),
            stream: false,
            n_predict: 96,
            temperature: 0.6,
            stop: vec!["User:".to_string(), "System:".to_string()],
        };

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("LLM server error: {}", response.status()));
        }

        let resp_json: CompletionResponse = response.json().await?;
        Ok(resp_json.content.trim().to_string())
    }
}

/// Flattens history plus the new utterance into a chat-style prompt.
pub fn build_prompt(history: &[Turn], text: &str) -> String {
    let mut prompt = format!("System: {}\n", SYSTEM_PROMPT);
    for turn in history {
        prompt.push_str(&format!(
            "User: {}\nAssistant: {}\n",
            turn.recognized_text, turn.response_text
        ));
    }
    prompt.push_str(&format!("User: {}\nAssistant:", text));
    prompt
}

impl ResponseGenerator for LlmResponder {
    fn generate(&self, history: &[Turn], text: &str) -> Result<String> {
        self.runtime.block_on(self.complete(history, text))
    }
}

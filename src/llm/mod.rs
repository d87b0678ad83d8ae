//! Client for the Ollama API.
//!
//! The model layer is a black box to the rest of the agent: hand it a
//! system/user prompt pair, get back generated text plus token counts.

use crate::prompt::Prompt;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// Text generated by the model plus token accounting.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    /// When set, every prompt sent is appended here for later inspection.
    transcript_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl LlmClient {
    pub fn new(base_url: &str, model: &str, transcript_path: Option<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            transcript_path,
        }
    }

    /// Send one prompt pair and return the generated text with token counts.
    pub async fn call_model(&self, prompt: &Prompt) -> Result<ModelResponse> {
        self.append_transcript(prompt);

        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            system: &prompt.system,
            prompt: &prompt.user,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error: {} - {}", status, body);
        }

        let result: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ModelResponse {
            text: result.response,
            prompt_tokens: result.prompt_eval_count,
            completion_tokens: result.eval_count,
        })
    }

    /// Check if the endpoint is reachable.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client.get(&url).send().await.is_ok()
    }

    fn append_transcript(&self, prompt: &Prompt) {
        let Some(path) = &self.transcript_path else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| {
                writeln!(f, "system: {}\nuser: {}\n", prompt.system, prompt.user)
            });
        if let Err(e) = result {
            tracing::warn!("Failed to append prompt transcript: {}", e);
        }
    }
}

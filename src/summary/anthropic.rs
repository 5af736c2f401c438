use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info};

use super::{Summarizer, SUMMARY_FILE};
use crate::config::SummaryConfig;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicSummarizer {
    client: reqwest::Client,
    config: SummaryConfig,
}

impl AnthropicSummarizer {
    pub fn new(config: &SummaryConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!(
                "Anthropic API key not set: export MEETREC_ANTHROPIC_API_KEY or set summary.api_key in the config file"
            );
        }

        Ok(Self {
            client: reqwest::Client::new(),
            config: config.clone(),
        })
    }

    fn build_request<'a>(&'a self, transcript: &str) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: &self.config.prompt,
            messages: vec![Message {
                role: "user",
                content: format!("Here is the meeting transcript to summarize:\n\n{transcript}"),
            }],
        }
    }
}

fn collect_text(response: MessagesResponse) -> Result<String> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect();
    if text.trim().is_empty() {
        bail!("Empty response from Anthropic API");
    }
    Ok(text)
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    fn name(&self) -> &'static str {
        "Anthropic"
    }

    async fn summarize(&self, transcript: &str, meeting_dir: &Path) -> Result<String> {
        info!("Summarizing transcript with {}", self.config.model);
        debug!("Transcript length: {} chars", transcript.len());

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.build_request(transcript))
            .send()
            .await
            .context("Failed to call Anthropic API")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Anthropic response body")?;
        if !status.is_success() {
            error!("Anthropic API failed with status {}: {}", status, body);
            bail!("Anthropic API error (HTTP {}): {}", status.as_u16(), body);
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).context("Failed to parse Anthropic response")?;
        let summary = collect_text(parsed)?;

        let summary_path = meeting_dir.join(SUMMARY_FILE);
        tokio::fs::write(&summary_path, format!("# Meeting Summary\n\n{}\n", summary.trim()))
            .await
            .with_context(|| format!("Failed to write {:?}", summary_path))?;

        info!("Summary written to {:?}", summary_path);
        Ok(summary)
    }
}

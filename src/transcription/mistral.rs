use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use tracing::{debug, error, info};

use super::{TranscriptResult, Transcriber, TRANSCRIPT_FILE};
use crate::config::TranscriptionConfig;

/// Mistral audio transcription with speaker diarization.
pub struct MistralTranscriber {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl MistralTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!(
                "Mistral API key not set: export MEETREC_MISTRAL_API_KEY or set transcription.api_key in the config file"
            );
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }

    async fn request(&self, audio_path: &Path) -> Result<TranscriptResult> {
        let audio = tokio::fs::read(audio_path)
            .await
            .with_context(|| format!("Failed to read audio file {:?}", audio_path))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.wav".to_string());

        let form = Form::new()
            .text("model", self.model.clone())
            .text("diarize", "true")
            .part(
                "file",
                Part::bytes(audio)
                    .file_name(file_name)
                    .mime_str("audio/wav")?,
            );

        debug!("Uploading {:?} to {}", audio_path, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to call Mistral API")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Mistral response body")?;

        if !status.is_success() {
            error!("Mistral API failed with status {}: {}", status, body);
            bail!("Mistral API error (HTTP {}): {}", status.as_u16(), body);
        }

        serde_json::from_str(&body).context("Failed to parse Mistral response")
    }
}

#[async_trait]
impl Transcriber for MistralTranscriber {
    fn name(&self) -> &'static str {
        "Mistral"
    }

    async fn transcribe(&self, audio_path: &Path, meeting_dir: &Path) -> Result<String> {
        info!("Transcribing {:?} with {}", audio_path, self.model);
        let result = self.request(audio_path).await?;
        let markdown = result.to_markdown();

        let transcript_path = meeting_dir.join(TRANSCRIPT_FILE);
        tokio::fs::write(&transcript_path, &markdown)
            .await
            .with_context(|| format!("Failed to write {:?}", transcript_path))?;

        info!(
            "Transcript written to {:?} ({} segments)",
            transcript_path,
            result.segments.len()
        );
        Ok(markdown)
    }
}

//! Post-recording processing: transcribe → summarize → hook.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::summary::{AnthropicSummarizer, Summarizer, SUMMARY_FILE};
use crate::transcription::{MistralTranscriber, Transcriber, TRANSCRIPT_FILE};

use super::post_meeting_hook::{MeetingResult, PostMeetingHook, ShellCommandHook};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Transcribing,
    Summarizing,
    RunningHook,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribing => "transcribing",
            Self::Summarizing => "summarizing",
            Self::RunningHook => "running hook",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedMeeting {
    pub transcript_path: PathBuf,
    pub summary_path: PathBuf,
}

pub struct MeetingPipeline {
    transcriber: Box<dyn Transcriber>,
    summarizer: Box<dyn Summarizer>,
    hook: Option<Box<dyn PostMeetingHook>>,
}

impl MeetingPipeline {
    pub fn new(
        transcriber: Box<dyn Transcriber>,
        summarizer: Box<dyn Summarizer>,
        hook: Option<Box<dyn PostMeetingHook>>,
    ) -> Self {
        Self {
            transcriber,
            summarizer,
            hook,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let transcriber = MistralTranscriber::new(&config.transcription)?;
        let summarizer = AnthropicSummarizer::new(&config.summary)?;
        let command = config.meeting.post_command.trim();
        let hook: Option<Box<dyn PostMeetingHook>> = if command.is_empty() {
            None
        } else {
            Some(Box::new(ShellCommandHook::new(
                command.to_string(),
                config.meeting.post_command_timeout_seconds,
            )))
        };

        Ok(Self::new(Box::new(transcriber), Box::new(summarizer), hook))
    }

    pub async fn process(
        &self,
        meeting_dir: &Path,
        audio_path: &Path,
        duration_seconds: u64,
    ) -> Result<ProcessedMeeting> {
        self.process_with_progress(meeting_dir, audio_path, duration_seconds, |_| {})
            .await
    }

    /// Same as [`process`](Self::process), reporting each stage as it begins.
    pub async fn process_with_progress<F>(
        &self,
        meeting_dir: &Path,
        audio_path: &Path,
        duration_seconds: u64,
        on_stage: F,
    ) -> Result<ProcessedMeeting>
    where
        F: Fn(PipelineStage) + Send + Sync,
    {
        on_stage(PipelineStage::Transcribing);
        let transcript = self
            .transcriber
            .transcribe(audio_path, meeting_dir)
            .await
            .with_context(|| format!("{} transcription failed", self.transcriber.name()))?;

        on_stage(PipelineStage::Summarizing);
        self.summarizer
            .summarize(&transcript, meeting_dir)
            .await
            .with_context(|| format!("{} summary failed", self.summarizer.name()))?;

        let processed = ProcessedMeeting {
            transcript_path: meeting_dir.join(TRANSCRIPT_FILE),
            summary_path: meeting_dir.join(SUMMARY_FILE),
        };

        if let Some(hook) = &self.hook {
            on_stage(PipelineStage::RunningHook);
            let result = MeetingResult {
                meeting_dir: meeting_dir.to_path_buf(),
                audio_path: audio_path.to_path_buf(),
                transcript_path: processed.transcript_path.clone(),
                transcript_text: transcript,
                summary_path: Some(processed.summary_path.clone()),
                duration_seconds,
            };
            if let Err(e) = hook.execute(&result).await {
                // does not affect the meeting outcome
                warn!("Post-meeting hook failed: {}", e);
            }
        }

        info!("Meeting {:?} processed", meeting_dir);
        Ok(processed)
    }
}

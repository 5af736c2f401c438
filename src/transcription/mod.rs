use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

pub mod mistral;

pub use mistral::MistralTranscriber;

pub const TRANSCRIPT_FILE: &str = "transcript.md";

/// One speaker turn of a diarized transcript.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TranscriptResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptResult {
    /// Transcript text handed to the summarizer: speaker-grouped when diarized.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Meeting Transcript\n\n");

        if self.segments.is_empty() {
            out.push_str(self.text.trim());
            out.push('\n');
            return out;
        }

        let mut current: Option<&str> = None;
        for segment in &self.segments {
            if current != Some(segment.speaker.as_str()) {
                if current.is_some() {
                    out.push_str("\n\n");
                }
                current = Some(segment.speaker.as_str());
                let speaker = if segment.speaker.is_empty() {
                    "Unknown"
                } else {
                    segment.speaker.as_str()
                };
                out.push_str(&format!("**{}:**\n", speaker));
            } else {
                out.push(' ');
            }
            out.push_str(segment.text.trim());
        }
        out.push('\n');
        out
    }
}

/// Turns a recording into text and writes `transcript.md` into the meeting folder.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the markdown transcript that was written.
    async fn transcribe(&self, audio_path: &Path, meeting_dir: &Path) -> Result<String>;
}

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub mod anthropic;

pub use anthropic::AnthropicSummarizer;

pub const SUMMARY_FILE: &str = "summary.md";

/// Produces a summary of a transcript and writes `summary.md` into the meeting folder.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn summarize(&self, transcript: &str, meeting_dir: &Path) -> Result<String>;
}

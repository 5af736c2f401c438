//! Post-meeting hook abstraction and shell command implementation.
//!
//! After the transcript and summary are written, an optional hook can run to
//! file the results somewhere else (notes app, knowledge base, chat, ...).

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable names for meeting metadata passed to hooks.
pub mod hook_env {
    pub const MEETING_DIR: &str = "MEETREC_MEETING_DIR";
    pub const MEETING_NAME: &str = "MEETREC_MEETING_NAME";
    pub const AUDIO_PATH: &str = "MEETREC_AUDIO_PATH";
    pub const TRANSCRIPT_PATH: &str = "MEETREC_TRANSCRIPT_PATH";
    pub const SUMMARY_PATH: &str = "MEETREC_SUMMARY_PATH";
    pub const DURATION_SECONDS: &str = "MEETREC_DURATION_SECONDS";
}

/// A processed meeting, passed to hooks.
pub struct MeetingResult {
    pub meeting_dir: PathBuf,
    pub audio_path: PathBuf,
    pub transcript_path: PathBuf,
    pub transcript_text: String,
    pub summary_path: Option<PathBuf>,
    pub duration_seconds: u64,
}

impl MeetingResult {
    fn meeting_name(&self) -> String {
        self.meeting_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait PostMeetingHook: Send + Sync {
    async fn execute(&self, result: &MeetingResult) -> Result<()>;
}

/// Executes a shell command with meeting data.
/// - Pipes the transcript to stdin
/// - Sets environment variables for meeting metadata
/// - Kills process on timeout
/// - Non-zero exit code logs warning but does not fail
pub struct ShellCommandHook {
    command: String,
    timeout: Duration,
}

impl ShellCommandHook {
    pub fn new(command: String, timeout_seconds: u64) -> Self {
        Self {
            command,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }
}

#[async_trait]
impl PostMeetingHook for ShellCommandHook {
    async fn execute(&self, result: &MeetingResult) -> Result<()> {
        info!(
            "Running post-meeting hook for {:?}: {}",
            result.meeting_dir, self.command
        );

        let summary_path = result
            .summary_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&result.meeting_dir)
            .env(hook_env::MEETING_DIR, &result.meeting_dir)
            .env(hook_env::MEETING_NAME, result.meeting_name())
            .env(hook_env::AUDIO_PATH, &result.audio_path)
            .env(hook_env::TRANSCRIPT_PATH, &result.transcript_path)
            .env(hook_env::SUMMARY_PATH, summary_path)
            .env(hook_env::DURATION_SECONDS, result.duration_seconds.to_string())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(result.transcript_text.as_bytes()).await;
            // dropped here: EOF
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if !stdout.trim().is_empty() {
                        info!("Post-meeting hook stdout: {}", stdout.trim());
                    }
                    info!("Post-meeting hook completed successfully");
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(
                        "Post-meeting hook exited with status {}: {}",
                        output.status,
                        stderr.trim()
                    );
                }
            }
            Ok(Err(e)) => {
                warn!("Post-meeting hook failed to execute: {}", e);
            }
            Err(_) => {
                warn!(
                    "Post-meeting hook timed out after {}s (process will be killed)",
                    self.timeout.as_secs()
                );
            }
        }

        Ok(())
    }
}

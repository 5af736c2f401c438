//! External audio capture processes.
//!
//! A capture process records one input to one file. Background captures are detached and
//! identified afterwards only by their [`ProcessHandle`], which is persisted in the session
//! record so a later invocation can stop them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SessionError, SessionResult};

pub mod ffmpeg;
pub mod process;

pub use ffmpeg::FfmpegRecorder;

/// Identifies a detached capture process across invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Executable name, checked before signalling to avoid hitting a reused pid.
    pub program: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the interrupt.
    Exited,
    /// Was not running when stop was requested.
    AlreadyExited,
    /// Ignored the interrupt past the timeout and was killed.
    Killed,
}

#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Fail fast if the capture tool is not installed. No side effects.
    fn check_tool_available(&self) -> SessionResult<()>;

    /// Spawn a detached capture of `source` into `output`.
    async fn start_background(&self, source: &str, output: &Path) -> SessionResult<ProcessHandle>;

    /// Capture in the foreground until the process exits or the user interrupts.
    async fn start_foreground(&self, source: &str, output: &Path) -> SessionResult<()>;

    /// Gracefully interrupt a capture so it can finalize its file. Never fails because the
    /// process is already gone.
    async fn stop_process(&self, handle: &ProcessHandle) -> SessionResult<StopOutcome>;

    /// Forcefully terminate a capture. Used only to undo a start that could not be persisted.
    async fn kill_process(&self, handle: &ProcessHandle);

    /// Spawn a detached microphone-only capture (dual-stream mode).
    async fn record_mic(&self, mic: &str, output: &Path) -> SessionResult<ProcessHandle>;

    /// Spawn the system and mic captures of a dual-stream recording. The tracks are mixed
    /// sample-aligned, so both must start at the same moment. On error neither keeps running.
    async fn start_dual(
        &self,
        system_source: &str,
        system_output: &Path,
        mic: &str,
        mic_output: &Path,
    ) -> SessionResult<(ProcessHandle, ProcessHandle)> {
        let system = self.start_background(system_source, system_output).await?;
        match self.record_mic(mic, mic_output).await {
            Ok(mic) => Ok((system, mic)),
            Err(e) => {
                self.kill_process(&system).await;
                Err(e)
            }
        }
    }

    /// Block until the user interrupts the controller (dual-stream sync mode).
    async fn wait_for_interrupt(&self) -> SessionResult<()> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| SessionError::ProcessStartFailed(format!("cannot listen for Ctrl+C: {e}")))
    }

    /// Mix two mono tracks into `output`.
    async fn merge_audio(&self, system: &Path, mic: &Path, output: &Path) -> SessionResult<()> {
        let (system, mic, output) = (system.to_path_buf(), mic.to_path_buf(), output.to_path_buf());
        tokio::task::spawn_blocking(move || crate::audio::merge_tracks(&system, &mic, &output))
            .await
            .map_err(|e| SessionError::state_io("merge task panicked", e))?
            .map_err(|e| SessionError::state_io("merging audio tracks", format!("{e:#}")))
    }
}

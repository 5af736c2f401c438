use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{process, CaptureBackend, ProcessHandle, StopOutcome};
use crate::config::RecordingConfig;
use crate::error::{SessionError, SessionResult};

/// A capture that dies within this window (bad device, bad args) is reported as a start failure.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const LOG_TAIL_LINES: usize = 5;

const INSTALL_HINT: &str = "Install it with your package manager, e.g. 'sudo apt install ffmpeg', \
'sudo pacman -S ffmpeg' or 'brew install ffmpeg'";

/// Records through an `ffmpeg` subprocess.
pub struct FfmpegRecorder {
    program: String,
    input_format: String,
    sample_rate: u32,
    stop_timeout: Duration,
}

impl FfmpegRecorder {
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            program: config.capture_tool.clone(),
            input_format: config.input_format.clone(),
            sample_rate: config.sample_rate,
            stop_timeout: Duration::from_secs(config.stop_timeout_seconds),
        }
    }

    fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    fn input_spec(&self, source: &str) -> String {
        // avfoundation addresses audio-only inputs as ":<device>"
        if self.input_format == "avfoundation" && !source.starts_with(':') {
            format!(":{source}")
        } else {
            source.to_string()
        }
    }

    fn capture_args(&self, source: &str, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
            "-f".to_string(),
            self.input_format.clone(),
            "-i".to_string(),
            self.input_spec(source),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    fn spawn_child(&self, source: &str, output: &Path) -> SessionResult<(Child, PathBuf)> {
        let log_path = sidecar_log_path(output);
        let stderr = match File::create(&log_path) {
            Ok(file) => Stdio::from(file),
            Err(e) => {
                warn!("Cannot create capture log {:?}: {}", log_path, e);
                Stdio::null()
            }
        };

        let args = self.capture_args(source, output);
        debug!("Spawning {} {}", self.program, args.join(" "));

        let mut command = std::process::Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr);
        #[cfg(unix)]
        {
            // Own process group: a Ctrl+C in the launching terminal must not reach it.
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|e| SessionError::ProcessStartFailed(format!("spawning {}: {e}", self.program)))?;
        Ok((child, log_path))
    }

    /// Call once `STARTUP_GRACE` has passed since the spawn.
    fn confirm_started(
        &self,
        mut child: Child,
        source: &str,
        log_path: &Path,
    ) -> SessionResult<ProcessHandle> {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(SessionError::ProcessStartFailed(format!(
                "{} exited immediately ({status}). {}",
                self.program,
                log_tail(log_path)
            )));
        }

        let handle = ProcessHandle {
            pid: child.id(),
            program: self.program_name(),
        };
        info!("Capture of {} running as pid {}", source, handle.pid);
        // Dropping a std Child neither waits nor kills; the handle now owns the process.
        drop(child);
        Ok(handle)
    }

    async fn spawn_detached(&self, source: &str, output: &Path) -> SessionResult<ProcessHandle> {
        let (child, log_path) = self.spawn_child(source, output)?;
        tokio::time::sleep(STARTUP_GRACE).await;
        self.confirm_started(child, source, &log_path)
    }
}

fn discard(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[async_trait]
impl CaptureBackend for FfmpegRecorder {
    fn check_tool_available(&self) -> SessionResult<()> {
        which::which(&self.program)
            .map(|path| debug!("Capture tool found at {:?}", path))
            .map_err(|_| SessionError::PrerequisiteMissing {
                tool: self.program.clone(),
                remediation: INSTALL_HINT.to_string(),
            })
    }

    async fn start_background(&self, source: &str, output: &Path) -> SessionResult<ProcessHandle> {
        self.spawn_detached(source, output).await
    }

    async fn start_foreground(&self, source: &str, output: &Path) -> SessionResult<()> {
        let args = self.capture_args(source, output);
        debug!("Running {} {}", self.program, args.join(" "));

        let mut command = std::process::Command::new(&self.program);
        command.args(&args).stdin(Stdio::null());
        #[cfg(unix)]
        {
            // Ctrl+C is handled here and forwarded as SIGINT once.
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = tokio::process::Command::from(command)
            .spawn()
            .map_err(|e| SessionError::ProcessStartFailed(format!("spawning {}: {e}", self.program)))?;

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| SessionError::ProcessStartFailed(format!("waiting for {}: {e}", self.program)))?;
                if status.success() {
                    return Ok(());
                }
                return Err(SessionError::ProcessStartFailed(format!(
                    "{} exited with {status} before recording was stopped",
                    self.program
                )));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, finalizing recording");
            }
        }

        if let Some(pid) = child.id() {
            if let Err(e) = process::interrupt(pid) {
                warn!("Failed to interrupt capture process {}: {}", pid, e);
            }
        }

        // Non-zero exit after an interrupt is normal for ffmpeg.
        let force = tokio::select! {
            waited = tokio::time::timeout(self.stop_timeout, child.wait()) => match waited {
                Ok(Ok(status)) => {
                    debug!("Capture exited with {}", status);
                    false
                }
                Ok(Err(e)) => {
                    warn!("Failed waiting for capture process: {}", e);
                    false
                }
                Err(_) => {
                    warn!(
                        "Capture did not exit within {}s, killing it",
                        self.stop_timeout.as_secs()
                    );
                    true
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Second interrupt received, killing capture");
                true
            }
        };
        if force {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill capture process: {}", e);
            }
        }
        Ok(())
    }

    async fn stop_process(&self, handle: &ProcessHandle) -> SessionResult<StopOutcome> {
        process::stop_gracefully(handle, self.stop_timeout)
            .await
            .map_err(|e| SessionError::ProcessStartFailed(format!("signalling pid {}: {e}", handle.pid)))
    }

    async fn kill_process(&self, handle: &ProcessHandle) {
        if !process::matches_program(handle) {
            return;
        }
        match process::kill(handle.pid) {
            Ok(_) => {
                process::wait_for_exit(handle.pid, Duration::from_secs(2)).await;
            }
            Err(e) => warn!("Failed to kill capture process {}: {}", handle.pid, e),
        }
    }

    async fn record_mic(&self, mic: &str, output: &Path) -> SessionResult<ProcessHandle> {
        self.spawn_detached(mic, output).await
    }

    async fn start_dual(
        &self,
        system_source: &str,
        system_output: &Path,
        mic: &str,
        mic_output: &Path,
    ) -> SessionResult<(ProcessHandle, ProcessHandle)> {
        // Both spawn before the grace period so the tracks share a start time.
        let (system_child, system_log) = self.spawn_child(system_source, system_output)?;
        let (mic_child, mic_log) = match self.spawn_child(mic, mic_output) {
            Ok(spawned) => spawned,
            Err(e) => {
                discard(system_child);
                return Err(e);
            }
        };

        tokio::time::sleep(STARTUP_GRACE).await;
        let system = match self.confirm_started(system_child, system_source, &system_log) {
            Ok(handle) => handle,
            Err(e) => {
                discard(mic_child);
                return Err(e);
            }
        };
        match self.confirm_started(mic_child, mic, &mic_log) {
            Ok(mic) => Ok((system, mic)),
            Err(e) => {
                self.kill_process(&system).await;
                Err(e)
            }
        }
    }
}

/// `<recording>.ffmpeg.log` next to the recording.
pub fn sidecar_log_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".ffmpeg.log");
    PathBuf::from(name)
}

fn log_tail(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return format!("See {}", path.display());
    };
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return format!("See {}", path.display());
    }
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    format!("Last output:\n{}", lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn recorder(format: &str) -> FfmpegRecorder {
        let config = RecordingConfig {
            input_format: format.to_string(),
            ..RecordingConfig::default()
        };
        FfmpegRecorder::new(&config)
    }

    #[test]
    fn test_capture_args_for_pulse() {
        let args = recorder("pulse").capture_args("meetrec_aggregate.monitor", Path::new("/m/recording.wav"));
        let joined = args.join(" ");
        assert!(joined.contains("-f pulse -i meetrec_aggregate.monitor"));
        assert!(joined.contains("-ac 1 -ar 16000"));
        assert!(joined.ends_with("-y /m/recording.wav"));
    }

    #[test]
    fn test_avfoundation_prefixes_device() {
        let rec = recorder("avfoundation");
        assert_eq!(rec.input_spec("BlackHole 2ch"), ":BlackHole 2ch");
        assert_eq!(rec.input_spec(":0"), ":0");
    }

    #[test]
    fn test_sidecar_log_path() {
        assert_eq!(
            sidecar_log_path(Path::new("/m/recording.wav")),
            PathBuf::from("/m/recording.wav.ffmpeg.log")
        );
    }

    #[test]
    fn test_log_tail_keeps_last_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.log");
        let content: String = (1..=8).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, content).unwrap();

        let tail = log_tail(&path);
        assert!(tail.contains("line 8"));
        assert!(tail.contains("line 4"));
        assert!(!tail.contains("line 3"));
    }

    #[test]
    fn test_missing_tool_is_prerequisite_error() {
        let config = RecordingConfig {
            capture_tool: "definitely-not-a-capture-tool".to_string(),
            ..RecordingConfig::default()
        };
        let err = FfmpegRecorder::new(&config).check_tool_available().unwrap_err();
        assert!(matches!(err, SessionError::PrerequisiteMissing { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dual_captures_start_together() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        // Stamps the spawn time next to its output file, then keeps running.
        let tool = dir.path().join("fake-capture");
        std::fs::write(
            &tool,
            "#!/bin/sh\nfor last; do :; done\ndate +%s%N > \"$last.started\"\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = RecordingConfig {
            capture_tool: tool.display().to_string(),
            ..RecordingConfig::default()
        };
        let system_out = dir.path().join("system.wav");
        let mic_out = dir.path().join("mic.wav");
        let (system, mic) = FfmpegRecorder::new(&config)
            .start_dual("meetrec_loopback.monitor", &system_out, "mic", &mic_out)
            .await
            .unwrap();

        let started = |out: &Path| -> i128 {
            let mut stamp = out.as_os_str().to_owned();
            stamp.push(".started");
            std::fs::read_to_string(PathBuf::from(stamp))
                .unwrap()
                .trim()
                .parse()
                .unwrap()
        };
        let offset = (started(&mic_out) - started(&system_out)).abs();
        assert!(offset < 250_000_000, "mic started {offset}ns after system");

        let _ = process::kill(system.pid);
        let _ = process::kill(mic.pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dual_start_failure_leaves_nothing_running() {
        let dir = tempdir().unwrap();
        let config = RecordingConfig {
            capture_tool: "false".to_string(),
            ..RecordingConfig::default()
        };
        let err = FfmpegRecorder::new(&config)
            .start_dual(
                "meetrec_loopback.monitor",
                &dir.path().join("system.wav"),
                "mic",
                &dir.path().join("mic.wav"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProcessStartFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_immediate_exit_is_start_failure() {
        let dir = tempdir().unwrap();
        let config = RecordingConfig {
            capture_tool: "false".to_string(),
            ..RecordingConfig::default()
        };
        let err = FfmpegRecorder::new(&config)
            .start_background("src", &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProcessStartFailed(_)));
    }
}

//! `meetrec doctor`: prerequisite checks and crash recovery.

use anyhow::{bail, Result};

use crate::capture::{process, CaptureBackend, FfmpegRecorder};
use crate::config::Config;
use crate::meeting::{FileSessionStore, MeetingMachine, SessionStore};
use crate::routing::{DeviceRouter, PulseRouter};

use super::args::DoctorCliArgs;

struct Report {
    ok: bool,
}

impl Report {
    fn check(&mut self, name: &str, passed: bool, detail: impl AsRef<str>) {
        let mark = if passed { "ok" } else { "!!" };
        println!("[{mark}] {name:<20} {}", detail.as_ref());
        self.ok &= passed;
    }

    /// Errors when any check failed.
    fn finish(self) -> Result<()> {
        if self.ok {
            println!("\nAll prerequisites met. Ready to record!");
            Ok(())
        } else {
            bail!("some checks failed, see the hints above")
        }
    }
}

pub async fn handle_doctor_command(args: DoctorCliArgs, config: &Config) -> Result<()> {
    let mut report = Report { ok: true };

    let recorder = FfmpegRecorder::new(&config.recording);
    match recorder.check_tool_available() {
        Ok(()) => report.check(&config.recording.capture_tool, true, "installed"),
        Err(e) => report.check(&config.recording.capture_tool, false, e.to_string()),
    }

    let router = PulseRouter::new(&config.routing);
    match which::which("pactl") {
        Ok(_) => {
            report.check("pactl", true, "installed");
            match router.find_routing_source().await {
                Ok(source) => report.check("Loopback sink", true, source.name),
                Err(e) => report.check("Loopback sink", false, e.to_string()),
            }
        }
        Err(_) => report.check(
            "pactl",
            false,
            "not found. Install pulseaudio-utils, libpulse or pipewire-pulse",
        ),
    }

    report.check(
        "Mistral API key",
        !config.transcription.api_key.is_empty(),
        if config.transcription.api_key.is_empty() {
            "not set. Export MEETREC_MISTRAL_API_KEY or set transcription.api_key"
        } else {
            "configured"
        },
    );
    report.check(
        "Anthropic API key",
        !config.summary.api_key.is_empty(),
        if config.summary.api_key.is_empty() {
            "not set. Export MEETREC_ANTHROPIC_API_KEY or set summary.api_key"
        } else {
            "configured"
        },
    );

    let meetings_dir = config.meetings_path();
    match std::fs::create_dir_all(&meetings_dir) {
        Ok(()) => report.check("Meetings directory", true, meetings_dir.display().to_string()),
        Err(e) => report.check(
            "Meetings directory",
            false,
            format!("{}: {e}", meetings_dir.display()),
        ),
    }

    check_session(&mut report, args.fix, config, router).await?;

    report.finish()
}

async fn check_session(
    report: &mut Report,
    fix: bool,
    config: &Config,
    router: PulseRouter,
) -> Result<()> {
    let store = FileSessionStore::default_location()?;

    let record = match store.read() {
        Ok(record) => record,
        Err(e) => {
            if fix {
                store.remove()?;
                report.check("Session state", true, "removed unreadable session record");
            } else {
                report.check(
                    "Session state",
                    false,
                    format!("{e}. Run 'meetrec doctor --fix' to remove it"),
                );
            }
            return Ok(());
        }
    };

    match record {
        Some(record) => {
            let handles: Vec<_> = record.process.iter().chain(record.mic_process.iter()).collect();
            let alive = handles.iter().any(|p| process::is_running(p.pid));
            if handles.is_empty() {
                // foreground recordings persist no handle
                report.check(
                    "Session state",
                    true,
                    format!(
                        "foreground recording started {}. If it is not running anymore, run 'meetrec stop'",
                        record.started_at.format("%Y-%m-%d %H:%M:%S")
                    ),
                );
            } else if alive {
                report.check("Session state", true, "recording in progress");
            } else if fix {
                let machine = MeetingMachine::new(
                    Box::new(router),
                    Box::new(FfmpegRecorder::new(&config.recording)),
                    Box::new(store),
                    config.meetings_path(),
                    config.folder_template.clone(),
                )
                .with_capture_mode(config.recording.capture_mode);
                let stopped = machine.stop().await?;
                report.check(
                    "Session state",
                    true,
                    format!(
                        "cleaned up stale session; recording kept in {}",
                        stopped.meeting_dir.display()
                    ),
                );
            } else {
                report.check(
                    "Session state",
                    false,
                    "a session is recorded but its capture process is gone. Run 'meetrec doctor --fix'",
                );
            }
        }
        None if fix => match router.destroy_stale_devices().await {
            Ok(0) => report.check("Session state", true, "idle, no leftover routing devices"),
            Ok(n) => report.check(
                "Session state",
                true,
                format!("idle, removed {n} leftover routing device(s)"),
            ),
            Err(e) => report.check("Session state", false, format!("idle; {e}")),
        },
        None => report.check("Session state", true, "idle"),
    }
    Ok(())
}

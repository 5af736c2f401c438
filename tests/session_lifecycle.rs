//! Start/stop across two independently constructed machines sharing only the state directory,
//! the way two `meetrec` invocations would.

use async_trait::async_trait;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meetrec::capture::{process, CaptureBackend, ProcessHandle, StopOutcome};
use meetrec::config::{CaptureMode, DEFAULT_FOLDER_TEMPLATE};
use meetrec::meeting::{FileSessionStore, MeetingMachine, SessionStore, StartOptions};
use meetrec::routing::{DeviceId, DeviceRouter, RoutingDevices, RoutingSource};
use meetrec::{SessionError, SessionResult};

#[derive(Default)]
struct Host {
    output: String,
    devices: Vec<DeviceId>,
}

struct MemoryRouter(Arc<Mutex<Host>>);

#[async_trait]
impl DeviceRouter for MemoryRouter {
    async fn find_routing_source(&self) -> SessionResult<RoutingSource> {
        Ok(RoutingSource {
            uid: "loopback".to_string(),
            name: "loopback".to_string(),
        })
    }

    async fn current_output(&self) -> SessionResult<String> {
        Ok(self.0.lock().unwrap().output.clone())
    }

    async fn create_routing_devices(&self, _source: &RoutingSource) -> SessionResult<RoutingDevices> {
        let mut host = self.0.lock().unwrap();
        let original = host.output.clone();
        host.devices = vec![DeviceId(1), DeviceId(2)];
        host.output = "multi".to_string();
        Ok(RoutingDevices {
            multi_output_id: DeviceId(1),
            aggregate_id: DeviceId(2),
            aggregate_capture_name: "aggregate.monitor".to_string(),
            system_capture_name: "loopback.monitor".to_string(),
            original_output_id: original,
            mic_id: "mic".to_string(),
        })
    }

    async fn destroy_routing_devices(&self, ids: &[DeviceId]) -> SessionResult<()> {
        self.0.lock().unwrap().devices.retain(|d| !ids.contains(d));
        Ok(())
    }

    async fn switch_output(&self, output_id: &str) -> SessionResult<()> {
        self.0.lock().unwrap().output = output_id.to_string();
        Ok(())
    }

    async fn destroy_stale_devices(&self) -> SessionResult<usize> {
        Ok(0)
    }
}

/// Runs `sleep` as the capture process and writes the output file up front.
struct SleepCapture;

#[async_trait]
impl CaptureBackend for SleepCapture {
    fn check_tool_available(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn start_background(&self, _source: &str, output: &Path) -> SessionResult<ProcessHandle> {
        std::fs::write(output, b"RIFF").map_err(|e| SessionError::state_io("writing", e))?;
        let child = Command::new("sleep")
            .arg("60")
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| SessionError::ProcessStartFailed(e.to_string()))?;
        Ok(ProcessHandle {
            pid: child.id(),
            program: "sleep".to_string(),
        })
    }

    async fn start_foreground(&self, _source: &str, output: &Path) -> SessionResult<()> {
        std::fs::write(output, b"RIFF").map_err(|e| SessionError::state_io("writing", e))
    }

    async fn stop_process(&self, handle: &ProcessHandle) -> SessionResult<StopOutcome> {
        process::stop_gracefully(handle, Duration::from_secs(5))
            .await
            .map_err(|e| SessionError::ProcessStartFailed(e.to_string()))
    }

    async fn kill_process(&self, handle: &ProcessHandle) {
        let _ = process::kill(handle.pid);
    }

    async fn record_mic(&self, mic: &str, output: &Path) -> SessionResult<ProcessHandle> {
        self.start_background(mic, output).await
    }
}

fn machine(host: &Arc<Mutex<Host>>, root: &Path) -> MeetingMachine {
    MeetingMachine::new(
        Box::new(MemoryRouter(host.clone())),
        Box::new(SleepCapture),
        Box::new(FileSessionStore::new(root.join("state"))),
        root.join("meetings"),
        DEFAULT_FOLDER_TEMPLATE.to_string(),
    )
}

fn host_with_output(output: &str) -> Arc<Mutex<Host>> {
    Arc::new(Mutex::new(Host {
        output: output.to_string(),
        devices: Vec::new(),
    }))
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_background_recording_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let host = host_with_output("speakers");
    let store = FileSessionStore::new(root.path().join("state"));

    let started = machine(&host, root.path())
        .start(StartOptions {
            name: Some("weekly sync".to_string()),
            sync: false,
        })
        .await
        .unwrap();
    let pid = started.process.as_ref().unwrap().pid;
    assert!(process::is_running(pid));
    assert!(store.exists());
    assert_eq!(host.lock().unwrap().output, "multi");

    let stopped = machine(&host, root.path()).stop().await.unwrap();

    assert!(stopped.audio_path.exists());
    assert!(stopped.meeting_dir.is_dir());
    assert!(stopped.meeting_name().ends_with("_weekly sync"));
    assert!(!store.exists());
    assert!(!process::is_running(pid));
    let host = host.lock().unwrap();
    assert_eq!(host.output, "speakers");
    assert!(host.devices.is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_after_capture_crashed() {
    let root = tempfile::tempdir().unwrap();
    let host = host_with_output("speakers");

    let started = machine(&host, root.path())
        .start(StartOptions::default())
        .await
        .unwrap();
    let pid = started.process.unwrap().pid;
    process::kill(pid).unwrap();
    process::wait_for_exit(pid, Duration::from_secs(2)).await;

    machine(&host, root.path()).stop().await.unwrap();
    assert!(!FileSessionStore::new(root.path().join("state")).exists());
    assert_eq!(host.lock().unwrap().output, "speakers");
}

#[tokio::test]
async fn test_sync_recording_restores_host() {
    let root = tempfile::tempdir().unwrap();
    let host = host_with_output("headphones");

    let record = machine(&host, root.path())
        .with_capture_mode(CaptureMode::Aggregate)
        .start(StartOptions {
            name: None,
            sync: true,
        })
        .await
        .unwrap();

    assert!(record.audio_path.exists());
    assert!(!FileSessionStore::new(root.path().join("state")).exists());
    let host = host.lock().unwrap();
    assert_eq!(host.output, "headphones");
    assert!(host.devices.is_empty());
}

#[tokio::test]
async fn test_stop_without_start() {
    let root = tempfile::tempdir().unwrap();
    let host = host_with_output("speakers");
    let err = machine(&host, root.path()).stop().await.unwrap_err();
    assert!(matches!(err, SessionError::NoActiveRecording));
}

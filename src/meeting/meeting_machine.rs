//! Recording session orchestrator.
//!
//! start: check → find source → create devices → meeting folder → capture → persist
//! stop:  read record → stop capture → restore output → destroy devices → merge → remove record
//!
//! Every failure after devices exist rolls back what was created before surfacing.
//! Teardown on stop is best effort except for the final record removal.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::capture::{CaptureBackend, ProcessHandle, StopOutcome};
use crate::config::CaptureMode;
use crate::error::{SessionError, SessionResult};
use crate::routing::{DeviceRouter, RoutingDevices};

use super::naming::FolderTemplate;
use super::state::{SessionRecord, SessionStore, TrackPaths};

pub const RECORDING_FILE: &str = "recording.wav";
const SYSTEM_TRACK_FILE: &str = "system.wav";
const MIC_TRACK_FILE: &str = "mic.wav";

/// Options for starting a meeting.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub name: Option<String>,
    /// Record in the foreground until interrupted instead of detaching.
    pub sync: bool,
}

pub struct MeetingMachine {
    router: Box<dyn DeviceRouter>,
    capture: Box<dyn CaptureBackend>,
    store: Box<dyn SessionStore>,
    meetings_dir: PathBuf,
    folder_template: String,
    capture_mode: CaptureMode,
}

impl MeetingMachine {
    pub fn new(
        router: Box<dyn DeviceRouter>,
        capture: Box<dyn CaptureBackend>,
        store: Box<dyn SessionStore>,
        meetings_dir: PathBuf,
        folder_template: String,
    ) -> Self {
        Self {
            router,
            capture,
            store,
            meetings_dir,
            folder_template,
            capture_mode: CaptureMode::Aggregate,
        }
    }

    pub fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Start a recording.
    ///
    /// Async mode returns while recording continues, with the record persisted. Sync mode
    /// returns after the capture ends and the host is restored; nothing stays persisted.
    pub async fn start(&self, options: StartOptions) -> SessionResult<SessionRecord> {
        if self.store.exists() {
            let started_at = self
                .store
                .read()
                .ok()
                .flatten()
                .map(|record| record.started_at.to_rfc3339())
                .unwrap_or_else(|| "at an unknown time".to_string());
            return Err(SessionError::AlreadyRecording { started_at });
        }

        self.capture.check_tool_available()?;
        let source = self.router.find_routing_source().await?;
        info!("Using routing source {} ({})", source.name, source.uid);

        let devices = self.router.create_routing_devices(&source).await?;

        let started_at = Local::now();
        let meeting_dir = match self.create_meeting_dir(&started_at, options.name.as_deref()) {
            Ok(dir) => dir,
            Err(e) => {
                self.rollback_devices(&devices).await;
                return Err(e);
            }
        };

        let tracks = (self.capture_mode == CaptureMode::DualStream).then(|| TrackPaths {
            system_path: meeting_dir.join(SYSTEM_TRACK_FILE),
            mic_path: meeting_dir.join(MIC_TRACK_FILE),
        });
        let record = SessionRecord {
            process: None,
            mic_process: None,
            started_at,
            audio_path: meeting_dir.join(RECORDING_FILE),
            meeting_dir,
            original_output_id: Some(devices.original_output_id.clone()),
            multi_output_id: Some(devices.multi_output_id),
            aggregate_id: Some(devices.aggregate_id),
            capture_mode: self.capture_mode,
            tracks,
        };

        if options.sync {
            self.run_foreground(record, &devices).await
        } else {
            self.run_background(record, &devices).await
        }
    }

    /// Stop the active recording and restore the host. Returns the finished record.
    pub async fn stop(&self) -> SessionResult<SessionRecord> {
        let record = self.store.read()?.ok_or(SessionError::NoActiveRecording)?;
        info!("Stopping recording started {}", record.started_at.to_rfc3339());

        self.stop_captures(&record).await;
        self.restore_host(&record).await;
        self.finalize_tracks(&record).await;

        self.store.remove()?;
        info!("Recording saved to {:?}", record.audio_path);
        Ok(record)
    }

    async fn run_background(
        &self,
        mut record: SessionRecord,
        devices: &RoutingDevices,
    ) -> SessionResult<SessionRecord> {
        let (primary, mic) = match self.spawn_captures(&record, devices).await {
            Ok(handles) => handles,
            Err(e) => {
                self.rollback_devices(devices).await;
                return Err(e);
            }
        };
        record.process = Some(primary);
        record.mic_process = mic;

        if let Err(e) = self.store.write(&record) {
            self.kill_captures(&record).await;
            self.rollback_devices(devices).await;
            return Err(e);
        }

        info!(
            "Recording started in the background (pid {})",
            record.process.as_ref().map(|p| p.pid).unwrap_or_default()
        );
        Ok(record)
    }

    async fn run_foreground(
        &self,
        mut record: SessionRecord,
        devices: &RoutingDevices,
    ) -> SessionResult<SessionRecord> {
        let captured = match self.capture_mode {
            CaptureMode::Aggregate => {
                if let Err(e) = self.store.write(&record) {
                    self.rollback_devices(devices).await;
                    return Err(e);
                }
                self.capture
                    .start_foreground(&devices.aggregate_capture_name, &record.audio_path)
                    .await
            }
            CaptureMode::DualStream => {
                let (primary, mic) = match self.spawn_captures(&record, devices).await {
                    Ok(handles) => handles,
                    Err(e) => {
                        self.rollback_devices(devices).await;
                        return Err(e);
                    }
                };
                record.process = Some(primary);
                record.mic_process = mic;
                if let Err(e) = self.store.write(&record) {
                    self.kill_captures(&record).await;
                    self.rollback_devices(devices).await;
                    return Err(e);
                }

                let interrupted = self.capture.wait_for_interrupt().await;
                self.stop_captures(&record).await;
                interrupted
            }
        };

        self.restore_host(&record).await;
        if captured.is_ok() {
            self.finalize_tracks(&record).await;
        }
        self.store.remove()?;
        captured?;

        // The processes are gone; the returned record describes a finished recording.
        record.process = None;
        record.mic_process = None;
        Ok(record)
    }

    /// Returns the primary capture and, in dual-stream mode, the mic capture.
    async fn spawn_captures(
        &self,
        record: &SessionRecord,
        devices: &RoutingDevices,
    ) -> SessionResult<(ProcessHandle, Option<ProcessHandle>)> {
        let Some(tracks) = &record.tracks else {
            let handle = self
                .capture
                .start_background(&devices.aggregate_capture_name, &record.audio_path)
                .await?;
            return Ok((handle, None));
        };

        let (system, mic) = self
            .capture
            .start_dual(
                &devices.system_capture_name,
                &tracks.system_path,
                &devices.mic_id,
                &tracks.mic_path,
            )
            .await?;
        Ok((system, Some(mic)))
    }

    fn create_meeting_dir(&self, at: &DateTime<Local>, name: Option<&str>) -> SessionResult<PathBuf> {
        let folder = FolderTemplate::parse(&self.folder_template)?.render(&at.naive_local(), name)?;
        let dir = unique_dir(&self.meetings_dir, &folder);
        std::fs::create_dir_all(&dir)
            .map_err(|e| SessionError::state_io(&format!("creating meeting folder {:?}", dir), e))?;
        info!("Meeting folder: {:?}", dir);
        Ok(dir)
    }

    async fn stop_captures(&self, record: &SessionRecord) {
        for handle in record.process.iter().chain(record.mic_process.iter()) {
            match self.capture.stop_process(handle).await {
                Ok(StopOutcome::Exited) => info!("Capture process {} stopped", handle.pid),
                Ok(StopOutcome::AlreadyExited) => {
                    warn!("Capture process {} had already exited", handle.pid)
                }
                Ok(StopOutcome::Killed) => warn!(
                    "Capture process {} had to be killed; the end of the recording may be lost",
                    handle.pid
                ),
                Err(e) => warn!("Failed to stop capture process {}: {}", handle.pid, e),
            }
        }
    }

    async fn kill_captures(&self, record: &SessionRecord) {
        for handle in record.process.iter().chain(record.mic_process.iter()) {
            self.capture.kill_process(handle).await;
        }
    }

    /// Output first: destroying the device playback points at can leave the host silent.
    async fn restore_host(&self, record: &SessionRecord) {
        if let Some(original) = &record.original_output_id {
            if let Err(e) = self.router.switch_output(original).await {
                warn!("Failed to restore audio output to {}: {}", original, e);
            }
        }

        let ids = record.created_device_ids();
        if !ids.is_empty() {
            if let Err(e) = self.router.destroy_routing_devices(&ids).await {
                warn!("Failed to remove routing devices: {}", e);
            }
        }
    }

    async fn rollback_devices(&self, devices: &RoutingDevices) {
        warn!("Rolling back routing devices");
        if let Err(e) = self.router.switch_output(&devices.original_output_id).await {
            warn!("Failed to restore audio output during rollback: {}", e);
        }
        if let Err(e) = self
            .router
            .destroy_routing_devices(&devices.created_ids())
            .await
        {
            warn!("Failed to remove routing devices during rollback: {}", e);
        }
    }

    /// Dual-stream only: mix the tracks, falling back to the mic track.
    async fn finalize_tracks(&self, record: &SessionRecord) {
        let Some(tracks) = &record.tracks else {
            return;
        };

        match self
            .capture
            .merge_audio(&tracks.system_path, &tracks.mic_path, &record.audio_path)
            .await
        {
            Ok(()) => info!("Merged system and mic tracks"),
            Err(e) => {
                warn!("Failed to merge tracks ({}), keeping the mic track only", e);
                if let Err(e) = std::fs::copy(&tracks.mic_path, &record.audio_path) {
                    warn!("Failed to copy mic track to {:?}: {}", record.audio_path, e);
                }
            }
        }
    }
}

/// `<parent>/<name>`, or `<name>-N` if a non-empty folder of that name exists.
fn unique_dir(parent: &Path, name: &str) -> PathBuf {
    let candidate = parent.join(name);
    if is_free(&candidate) {
        return candidate;
    }
    for i in 1..100 {
        let alt = parent.join(format!("{name}-{i}"));
        if is_free(&alt) {
            return alt;
        }
    }
    candidate
}

fn is_free(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !dir.exists(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unique_dir_reuses_empty_folder() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("standup")).unwrap();
        assert_eq!(unique_dir(dir.path(), "standup"), dir.path().join("standup"));
    }

    #[test]
    fn test_unique_dir_skips_used_folders() {
        let dir = tempdir().unwrap();
        for name in ["standup", "standup-1"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join(RECORDING_FILE), "x").unwrap();
        }
        assert_eq!(unique_dir(dir.path(), "standup"), dir.path().join("standup-2"));
    }
}

//! The persisted record of the active recording.
//!
//! The record file is the only lock between independent `start` and `stop` invocations:
//! it exists exactly while a recording is in progress.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::capture::ProcessHandle;
use crate::config::CaptureMode;
use crate::error::{SessionError, SessionResult};
use crate::routing::DeviceId;

const RECORD_FILE: &str = "current.json";

/// Per-stream files of a dual-stream recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPaths {
    pub system_path: PathBuf,
    pub mic_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Detached capture process; absent in sync mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_process: Option<ProcessHandle>,
    pub started_at: DateTime<Local>,
    pub audio_path: PathBuf,
    pub meeting_dir: PathBuf,
    /// Playback device before routing devices were created. The only value ever restored.
    #[serde(default)]
    pub original_output_id: Option<String>,
    #[serde(default)]
    pub multi_output_id: Option<DeviceId>,
    #[serde(default)]
    pub aggregate_id: Option<DeviceId>,
    #[serde(default)]
    pub capture_mode: CaptureMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<TrackPaths>,
}

impl SessionRecord {
    /// Routing devices this session created, in creation order.
    pub fn created_device_ids(&self) -> Vec<DeviceId> {
        self.multi_output_id
            .into_iter()
            .chain(self.aggregate_id)
            .collect()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        (Local::now() - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn meeting_name(&self) -> String {
        self.meeting_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Storage for the single active session record.
pub trait SessionStore: Send + Sync {
    fn exists(&self) -> bool;
    fn write(&self, record: &SessionRecord) -> SessionResult<()>;
    /// `Ok(None)` when no recording is active.
    fn read(&self) -> SessionResult<Option<SessionRecord>>;
    /// Removing a record that does not exist is not an error.
    fn remove(&self) -> SessionResult<()>;
}

/// JSON record at a fixed path, written via temp file + rename.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join(RECORD_FILE),
        }
    }

    /// The store under the user's state directory.
    pub fn default_location() -> anyhow::Result<Self> {
        Ok(Self::new(crate::global::state_dir()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn write(&self, record: &SessionRecord) -> SessionResult<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| SessionError::StateIoFailed(format!("{:?} has no parent", self.path)))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| SessionError::state_io("creating state directory", e))?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| SessionError::state_io("serializing session record", e))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| SessionError::state_io("creating temp state file", e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| SessionError::state_io("writing session record", e))?;
        tmp.persist(&self.path)
            .map_err(|e| SessionError::state_io("replacing session record", e.error))?;

        debug!("Session record written to {:?}", self.path);
        Ok(())
    }

    fn read(&self) -> SessionResult<Option<SessionRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::state_io("reading session record", e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SessionError::state_io(&format!("parsing {:?}", self.path), e))
    }

    fn remove(&self) -> SessionResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::state_io("removing session record", e)),
        }
    }
}

//! Listing of recorded meetings.
//!
//! A meeting is a folder under the meetings directory; its artifacts are detected by file name.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::meeting::RECORDING_FILE;
use crate::summary::SUMMARY_FILE;
use crate::transcription::TRANSCRIPT_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingEntry {
    pub name: String,
    pub path: PathBuf,
    pub has_recording: bool,
    pub has_transcript: bool,
    pub has_summary: bool,
}

impl MeetingEntry {
    fn from_dir(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            has_recording: path.join(RECORDING_FILE).is_file(),
            has_transcript: path.join(TRANSCRIPT_FILE).is_file(),
            has_summary: path.join(SUMMARY_FILE).is_file(),
            path,
        }
    }
}

/// Meeting folders, newest first. Names start with the date, so name order is time order.
/// A missing meetings directory yields an empty list.
pub fn list_meetings(meetings_dir: &Path, limit: usize) -> Result<Vec<MeetingEntry>> {
    let entries = match std::fs::read_dir(meetings_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {:?}", meetings_dir));
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    dirs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    Ok(dirs
        .into_iter()
        .take(limit)
        .map(MeetingEntry::from_dir)
        .collect())
}

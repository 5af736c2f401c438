use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_FOLDER_TEMPLATE: &str =
    "{{Year}}-{{Month}}-{{Day}}_{{Hour}}-{{Minute}}-{{Second}}{{if Name}}_{{Name}}{{end}}";

pub const DEFAULT_SUMMARY_PROMPT: &str = "You summarize meeting transcripts. Reply in markdown with \
these sections, omitting any that would be empty:

## Overview
Two or three sentences on what the meeting covered.

## Decisions
One bullet per decision.

## Action Items
One bullet per follow-up, naming the owner when the transcript makes it clear.

## Notes
Short notes on the remaining discussion.";

const ENV_MISTRAL_KEY: &str = "MEETREC_MISTRAL_API_KEY";
const ENV_ANTHROPIC_KEY: &str = "MEETREC_ANTHROPIC_API_KEY";
const ENV_MEETINGS_DIR: &str = "MEETREC_MEETINGS_DIR";

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where meeting folders are created. `~/` is expanded.
    pub meetings_dir: String,
    /// Folder name template, e.g. `{{Year}}-{{Month}}-{{Day}}{{if Name}}_{{Name}}{{end}}`
    pub folder_template: String,
    pub recording: RecordingConfig,
    pub routing: RoutingConfig,
    pub transcription: TranscriptionConfig,
    pub summary: SummaryConfig,
    pub meeting: MeetingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// One capture process reading the aggregate (mic + loopback) device.
    #[default]
    Aggregate,
    /// Separate mic and system captures, merged after stop.
    DualStream,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::DualStream => "dual-stream",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Capture binary, resolved through PATH.
    pub capture_tool: String,
    /// ffmpeg input format (`pulse`, `avfoundation`, ...).
    pub input_format: String,
    pub sample_rate: u32,
    /// Upper bound on waiting for the capture process after an interrupt.
    pub stop_timeout_seconds: u64,
    pub capture_mode: CaptureMode,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            capture_tool: "ffmpeg".to_string(),
            input_format: "pulse".to_string(),
            sample_rate: 16000,
            stop_timeout_seconds: 10,
            capture_mode: CaptureMode::Aggregate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Null sink that receives a copy of playback so it can be captured.
    pub loopback_sink: String,
    /// Microphone source name. Empty means the current default source.
    pub microphone: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            loopback_sink: "meetrec_loopback".to_string(),
            microphone: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.mistral.ai/v1/audio/transcriptions".to_string(),
            model: "voxtral-mini-latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub prompt: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-haiku-4-5".to_string(),
            max_tokens: 4096,
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MeetingConfig {
    /// Shell command to run after the summary is written.
    /// Receives transcript text via stdin.
    /// Env vars: MEETREC_MEETING_DIR, MEETREC_AUDIO_PATH, MEETREC_TRANSCRIPT_PATH,
    /// MEETREC_SUMMARY_PATH, MEETREC_DURATION_SECONDS
    pub post_command: String,
    /// Timeout in seconds for the post_command (default: 3600 = 1 hour)
    pub post_command_timeout_seconds: u64,
}

impl Default for MeetingConfig {
    fn default() -> Self {
        Self {
            post_command: String::new(),
            post_command_timeout_seconds: 3600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meetings_dir: "~/meetings".to_string(),
            folder_template: DEFAULT_FOLDER_TEMPLATE.to_string(),
            recording: RecordingConfig::default(),
            routing: RoutingConfig::default(),
            transcription: TranscriptionConfig::default(),
            summary: SummaryConfig::default(),
            meeting: MeetingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config.with_env_overrides());
        }

        Ok(Self::load_from(&config_path)?.with_env_overrides())
    }

    /// Parse a config file without applying environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let mut config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        if config.folder_template.trim().is_empty() {
            config.folder_template = DEFAULT_FOLDER_TEMPLATE.to_string();
        }
        if config.summary.prompt.trim().is_empty() {
            config.summary.prompt = DEFAULT_SUMMARY_PROMPT.to_string();
        }

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = non_empty_env(ENV_MISTRAL_KEY) {
            self.transcription.api_key = v;
        }
        if let Some(v) = non_empty_env(ENV_ANTHROPIC_KEY) {
            self.summary.api_key = v;
        }
        if let Some(v) = non_empty_env(ENV_MEETINGS_DIR) {
            self.meetings_dir = v;
        }
        self
    }

    pub fn meetings_path(&self) -> PathBuf {
        if self.meetings_dir.trim().is_empty() {
            return global::default_meetings_dir();
        }
        global::expand_tilde(&self.meetings_dir)
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

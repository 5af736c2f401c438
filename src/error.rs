//! Error taxonomy for the recording session lifecycle.
//!
//! Routing, capture and the session store all report through [`SessionError`] so the
//! orchestrator can decide what to roll back. CLI glue wraps these in `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a recording is already in progress (started {started_at}). Run 'meetrec stop' first")]
    AlreadyRecording { started_at: String },

    #[error("no active recording found")]
    NoActiveRecording,

    #[error("{tool} not found. {remediation}")]
    PrerequisiteMissing { tool: String, remediation: String },

    #[error("{device} not found.\n{remediation}")]
    RoutingDeviceMissing { device: String, remediation: String },

    #[error("audio device operation failed: {0}")]
    DeviceOperationFailed(String),

    #[error("failed to start recording process: {0}")]
    ProcessStartFailed(String),

    #[error("session state I/O failed: {0}")]
    StateIoFailed(String),

    #[error("invalid folder template: {0}")]
    TemplateInvalid(String),
}

impl SessionError {
    pub fn device(message: impl Into<String>) -> Self {
        Self::DeviceOperationFailed(message.into())
    }

    pub fn state_io(context: &str, err: impl std::fmt::Display) -> Self {
        Self::StateIoFailed(format!("{context}: {err}"))
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::TemplateInvalid(message.into())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

pub mod audio;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod global;
pub mod history;
pub mod meeting;
pub mod routing;
pub mod summary;
pub mod transcription;

pub use error::{SessionError, SessionResult};

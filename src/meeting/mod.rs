//! Meeting recording module.
//!
//! Owns the recording session lifecycle (routing devices, capture processes, the persisted
//! session record) and the processing that follows a finished recording.

pub mod meeting_machine;
pub mod naming;
pub mod pipeline;
pub mod post_meeting_hook;
pub mod state;


pub use meeting_machine::{MeetingMachine, StartOptions, RECORDING_FILE};
pub use naming::{render_folder_name, FolderTemplate};
pub use pipeline::{MeetingPipeline, PipelineStage, ProcessedMeeting};
pub use post_meeting_hook::{MeetingResult, PostMeetingHook, ShellCommandHook};
pub use state::{FileSessionStore, SessionRecord, SessionStore, TrackPaths};

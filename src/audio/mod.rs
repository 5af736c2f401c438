pub mod mixer;
pub mod wav;

pub use mixer::AudioMixer;
pub use wav::{inspect_recording, merge_tracks, RecordingInfo};

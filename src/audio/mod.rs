//! Cue playback: the playback port contract and its rodio implementation

mod output;
mod playback;

pub use output::{list_output_devices, match_device_name, OutputError, RodioPlayback};
pub use playback::{Completion, PlaybackError, PlaybackOutcome, PlaybackPort};

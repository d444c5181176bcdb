//! Hotkey module: which key is monitored and how its state is sampled
//!
//! The key monitor polls a platform key state source at a fixed interval
//! and feeds press/release edges to the cue engine.

mod keys;
mod monitor;
mod source;

pub use keys::{HotkeyError, KeyCode};
pub use monitor::{HotkeyEvent, KeyMonitor};
pub use source::{platform_source, KeyStateSource, PollError};

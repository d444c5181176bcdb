//! Cue module: the state machine that wraps a push-to-talk press in
//! prefix and suffix cue sounds
//!
//! States:
//! - Idle: waiting for the hotkey
//! - PlayingPrefix: opening cue playing, hotkey may already be released
//! - KeyHeld: hotkey held after the opening cue
//! - PlayingSuffix: closing cue playing with the synthetic key held down

mod engine;
mod state;

pub use engine::CueEngine;
pub use state::{Cue, CueState};

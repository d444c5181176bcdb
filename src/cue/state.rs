//! Cue states

use serde::{Deserialize, Serialize};

/// The four states of a cue cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueState {
    /// Waiting for the hotkey
    #[default]
    Idle,
    /// Prefix cue is playing; the hotkey may already be up
    PlayingPrefix,
    /// Hotkey is physically held, no cue playing
    KeyHeld,
    /// Synthetic key is down and the suffix cue is playing
    PlayingSuffix,
}

impl CueState {
    /// Whether a playback session is expected to be live in this state
    pub fn expects_playback(self) -> bool {
        matches!(self, CueState::PlayingPrefix | CueState::PlayingSuffix)
    }
}

impl std::fmt::Display for CueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CueState::Idle => write!(f, "Idle"),
            CueState::PlayingPrefix => write!(f, "PlayingPrefix"),
            CueState::KeyHeld => write!(f, "KeyHeld"),
            CueState::PlayingSuffix => write!(f, "PlayingSuffix"),
        }
    }
}

/// Which of the two cue sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Prefix,
    Suffix,
}

impl std::fmt::Display for Cue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cue::Prefix => write!(f, "prefix"),
            Cue::Suffix => write!(f, "suffix"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(CueState::default(), CueState::Idle);
    }

    #[test]
    fn test_expects_playback() {
        assert!(CueState::PlayingPrefix.expects_playback());
        assert!(CueState::PlayingSuffix.expects_playback());
        assert!(!CueState::Idle.expects_playback());
        assert!(!CueState::KeyHeld.expects_playback());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&CueState::PlayingSuffix).unwrap();
        assert_eq!(json, "\"playing_suffix\"");
    }
}

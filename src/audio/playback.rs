//! Audio playback port
//!
//! A port plays one cue file at a time. `play` either fails synchronously or
//! hands back a one-shot completion that resolves exactly once: `Finished`
//! when the file plays out, `Stopped` when the session is cancelled.

use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::oneshot;

/// How a playback session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
}

/// Resolves once when the session started by `play` ends
pub type Completion = oneshot::Receiver<PlaybackOutcome>;

/// Errors raised synchronously by `play`
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("sound file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("cannot decode {}: {reason}", .path.display())]
    DecodeError { path: PathBuf, reason: String },

    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl PlaybackError {
    /// Classify a failure to open a cue file
    pub fn from_open(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => PlaybackError::FileNotFound(path.to_path_buf()),
            _ => PlaybackError::DecodeError {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        }
    }
}

/// Plays cue files on the selected output device
pub trait PlaybackPort: Send {
    /// Start playing `path`, stopping any session that is still active
    fn play(&mut self, path: &Path) -> Result<Completion, PlaybackError>;

    /// Cancel the active session, if any. Idempotent.
    fn stop(&mut self);
}

/// A playing sound that can be polled for completion and halted
pub trait Voice {
    fn is_finished(&self) -> bool;
    fn halt(self);
}

struct ActiveSession<V> {
    voice: V,
    path: PathBuf,
    done: oneshot::Sender<PlaybackOutcome>,
}

/// Holds the single live playback session
///
/// The completion sender is owned by the session and consumed when it ends,
/// so a session can complete at most once whether it plays out or is stopped.
pub struct SessionSlot<V: Voice> {
    active: Option<ActiveSession<V>>,
}

impl<V: Voice> SessionSlot<V> {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Install a new session, stopping the previous one first
    pub fn begin(&mut self, voice: V, path: PathBuf) -> Completion {
        self.stop();
        let (done, completion) = oneshot::channel();
        self.active = Some(ActiveSession { voice, path, done });
        completion
    }

    /// Stop the active session. Returns false if nothing was playing.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(session) => {
                session.voice.halt();
                let _ = session.done.send(PlaybackOutcome::Stopped);
                true
            }
            None => false,
        }
    }

    /// Complete the active session if its sound has played out
    pub fn reap(&mut self) -> Option<PathBuf> {
        if !self.active.as_ref().is_some_and(|s| s.voice.is_finished()) {
            return None;
        }
        let session = self.active.take()?;
        let _ = session.done.send(PlaybackOutcome::Finished);
        Some(session.path)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl<V: Voice> Default for SessionSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    struct TestVoice {
        finished: Rc<Cell<bool>>,
        halted: Rc<Cell<u32>>,
    }

    impl Voice for TestVoice {
        fn is_finished(&self) -> bool {
            self.finished.get()
        }

        fn halt(self) {
            self.halted.set(self.halted.get() + 1);
        }
    }

    fn voice() -> (TestVoice, Rc<Cell<bool>>, Rc<Cell<u32>>) {
        let finished = Rc::new(Cell::new(false));
        let halted = Rc::new(Cell::new(0));
        let voice = TestVoice {
            finished: Rc::clone(&finished),
            halted: Rc::clone(&halted),
        };
        (voice, finished, halted)
    }

    #[test]
    fn test_natural_completion_fires_once() {
        let mut slot = SessionSlot::new();
        let (v, finished, halted) = voice();
        let mut completion = slot.begin(v, PathBuf::from("a.wav"));

        assert_eq!(slot.reap(), None);
        assert!(matches!(completion.try_recv(), Err(TryRecvError::Empty)));

        finished.set(true);
        assert_eq!(slot.reap(), Some(PathBuf::from("a.wav")));
        assert_eq!(completion.try_recv(), Ok(PlaybackOutcome::Finished));

        // stop after natural completion is a no-op
        assert!(!slot.stop());
        assert_eq!(halted.get(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut slot = SessionSlot::new();
        let (v, _finished, halted) = voice();
        let mut completion = slot.begin(v, PathBuf::from("a.wav"));

        assert!(slot.stop());
        assert!(!slot.stop());
        assert_eq!(halted.get(), 1);
        assert_eq!(completion.try_recv(), Ok(PlaybackOutcome::Stopped));
        assert!(!slot.is_active());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut slot: SessionSlot<TestVoice> = SessionSlot::default();
        assert!(!slot.stop());
        assert_eq!(slot.reap(), None);
    }

    #[test]
    fn test_begin_replaces_active_session() {
        let mut slot = SessionSlot::new();
        let (first, _, first_halted) = voice();
        let (second, _, _) = voice();

        let mut old = slot.begin(first, PathBuf::from("a.wav"));
        let mut new = slot.begin(second, PathBuf::from("b.wav"));

        assert_eq!(first_halted.get(), 1);
        assert_eq!(old.try_recv(), Ok(PlaybackOutcome::Stopped));
        assert!(matches!(new.try_recv(), Err(TryRecvError::Empty)));
        assert!(slot.is_active());
    }

    #[test]
    fn test_open_error_classification() {
        let path = Path::new("/missing.wav");
        let err = PlaybackError::from_open(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, PlaybackError::FileNotFound(_)));

        let err = PlaybackError::from_open(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, PlaybackError::DecodeError { .. }));
    }
}

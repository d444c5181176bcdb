//! Recording fakes for the playback, injection and key-state ports

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, oneshot};

use crate::audio::{Completion, PlaybackError, PlaybackOutcome, PlaybackPort};
use crate::events::{CueEvent, Severity};
use crate::hotkey::{KeyCode, KeyStateSource, PollError};
use crate::keysim::{InjectError, KeyInjector};

/// One observable call made by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Play(PathBuf),
    Stop,
    PressDown(KeyCode),
    ReleaseUp(KeyCode),
}

#[derive(Default)]
pub struct Recorder {
    pub calls: Vec<Call>,
    pub active: Option<oneshot::Sender<PlaybackOutcome>>,
    /// `play` was called while a session was still live
    pub overlapped: bool,
}

pub type Shared = Arc<Mutex<Recorder>>;

impl Recorder {
    pub fn calls(rec: &Shared) -> Vec<Call> {
        rec.lock().unwrap().calls.clone()
    }

    pub fn playing(rec: &Shared) -> bool {
        rec.lock().unwrap().active.is_some()
    }

    /// Let the active cue play out
    pub fn finish(rec: &Shared) {
        let tx = rec.lock().unwrap().active.take().expect("nothing playing");
        let _ = tx.send(PlaybackOutcome::Finished);
    }
}

pub struct FakePlayback {
    pub rec: Shared,
    pub missing: HashSet<PathBuf>,
}

impl FakePlayback {
    pub fn new(rec: &Shared) -> Self {
        Self {
            rec: Arc::clone(rec),
            missing: HashSet::new(),
        }
    }

    pub fn missing(mut self, paths: &[PathBuf]) -> Self {
        self.missing.extend(paths.iter().cloned());
        self
    }
}

impl PlaybackPort for FakePlayback {
    fn play(&mut self, path: &Path) -> Result<Completion, PlaybackError> {
        let mut rec = self.rec.lock().unwrap();
        rec.calls.push(Call::Play(path.to_path_buf()));
        if self.missing.contains(path) {
            return Err(PlaybackError::FileNotFound(path.to_path_buf()));
        }
        if rec.active.is_some() {
            rec.overlapped = true;
        }
        let (tx, rx) = oneshot::channel();
        rec.active = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut rec = self.rec.lock().unwrap();
        rec.calls.push(Call::Stop);
        if let Some(tx) = rec.active.take() {
            let _ = tx.send(PlaybackOutcome::Stopped);
        }
    }
}

/// Records every attempt, including the ones it is told to fail
pub struct RecordingInjector {
    pub rec: Shared,
    fail_press: bool,
    fail_release: bool,
}

impl RecordingInjector {
    pub fn new(rec: &Shared) -> Self {
        Self {
            rec: Arc::clone(rec),
            fail_press: false,
            fail_release: false,
        }
    }

    pub fn failing_press(mut self) -> Self {
        self.fail_press = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl KeyInjector for RecordingInjector {
    fn press_down(&mut self, key: KeyCode) -> Result<(), InjectError> {
        self.rec.lock().unwrap().calls.push(Call::PressDown(key));
        if self.fail_press {
            return Err(InjectError::Inject("accessibility permission denied".to_string()));
        }
        Ok(())
    }

    fn release_up(&mut self, key: KeyCode) -> Result<(), InjectError> {
        self.rec.lock().unwrap().calls.push(Call::ReleaseUp(key));
        if self.fail_release {
            return Err(InjectError::Inject("accessibility permission denied".to_string()));
        }
        Ok(())
    }
}

/// Drain the log lines of one severity published so far
pub fn drain_logs(rx: &mut broadcast::Receiver<CueEvent>, severity: Severity) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CueEvent::Log { message, severity: s } = event {
            if s == severity {
                lines.push(message);
            }
        }
    }
    lines
}

/// Key state flipped by the test
#[derive(Default)]
pub struct ToggleSource {
    down: AtomicBool,
    failing: AtomicBool,
}

impl ToggleSource {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl KeyStateSource for ToggleSource {
    fn is_down(&self, _key: KeyCode) -> Result<bool, PollError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PollError::Query("input server went away".to_string()));
        }
        Ok(self.down.load(Ordering::SeqCst))
    }
}

//! Cue engine: the push-to-talk cue state machine
//!
//! The engine is an actor. Hotkey edges from the key monitor and playback
//! completions are awaited in one `select!` loop, so exactly one transition
//! runs at a time and each transition issues its playback/injection actions
//! before the next event is looked at.
//!
//! Cycle: press -> prefix cue -> (hold) -> release -> synthetic key-down +
//! suffix cue -> synthetic key-up. The synthetic key-down before the suffix
//! keeps the downstream client transmitting through the closing cue.

use std::path::PathBuf;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::audio::{Completion, PlaybackError, PlaybackOutcome, PlaybackPort};
use crate::config::CueConfig;
use crate::events::{CueEvent, LogSink};
use crate::hotkey::{HotkeyEvent, PollError};
use crate::keysim::{InjectError, KeyInjector};

use super::state::{Cue, CueState};

/// The cue state machine and the ports it drives
pub struct CueEngine {
    /// Current state
    state: CueState,
    /// Hotkey came up while the prefix cue was still playing
    key_released: bool,
    /// A synthetic key-down is outstanding
    key_down: bool,
    /// Config snapshot taken at the start of the current cycle
    cycle: CueConfig,
    /// Latest config from the provider
    config_rx: watch::Receiver<CueConfig>,
    /// Completion of the live playback session, if any
    pending: Option<Completion>,
    playback: Box<dyn PlaybackPort>,
    injector: Box<dyn KeyInjector>,
    state_tx: watch::Sender<CueState>,
    sink: LogSink,
}

impl CueEngine {
    pub fn new(
        config_rx: watch::Receiver<CueConfig>,
        playback: Box<dyn PlaybackPort>,
        injector: Box<dyn KeyInjector>,
        sink: LogSink,
    ) -> Self {
        let cycle = config_rx.borrow().clone();
        let (state_tx, _) = watch::channel(CueState::Idle);
        Self {
            state: CueState::Idle,
            key_released: false,
            key_down: false,
            cycle,
            config_rx,
            pending: None,
            playback,
            injector,
            state_tx,
            sink,
        }
    }

    /// Get the current state
    pub fn state(&self) -> CueState {
        self.state
    }

    /// Read-only view of the state for status reporting
    pub fn subscribe_state(&self) -> watch::Receiver<CueState> {
        self.state_tx.subscribe()
    }

    /// Run until `stop_rx` flips to true, the hotkey channel closes, or the
    /// monitor reports a polling failure. Always tears down before returning.
    pub async fn run(
        mut self,
        mut hotkey_rx: mpsc::Receiver<HotkeyEvent>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> Result<(), PollError> {
        info!(hotkey = %self.cycle.hotkey, "cue engine started in Idle state");

        let result = loop {
            if *stop_rx.borrow() {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }

                outcome = wait_for(&mut self.pending) => {
                    self.pending = None;
                    self.on_playback_complete(outcome);
                }

                event = hotkey_rx.recv() => match event {
                    Some(HotkeyEvent::Pressed) => self.on_pressed(),
                    Some(HotkeyEvent::Released) => self.on_released(),
                    Some(HotkeyEvent::PollFailed(e)) => {
                        self.sink.error(format!("hotkey polling failed: {}", e));
                        break Err(e);
                    }
                    None => break Ok(()),
                },
            }
        };

        self.shutdown();
        info!("cue engine stopped");
        result
    }

    /// Physical hotkey went down
    pub(crate) fn on_pressed(&mut self) {
        if self.state != CueState::Idle {
            debug!(state = %self.state, "press ignored, cue cycle in progress");
            return;
        }

        self.cycle = self.config_rx.borrow_and_update().clone();
        self.sink.info(format!("hotkey pressed: {}", self.cycle.hotkey));

        if !self.cycle.prefix_enabled {
            self.transition(CueState::KeyHeld);
            return;
        }

        self.key_released = false;
        match self.start_cue(Cue::Prefix) {
            Ok(()) => self.transition(CueState::PlayingPrefix),
            Err(e) => self.abort_cycle(Cue::Prefix, e),
        }
    }

    /// Physical hotkey went up
    pub(crate) fn on_released(&mut self) {
        match self.state {
            CueState::PlayingPrefix => {
                self.key_released = true;
                self.sink.info(format!(
                    "hotkey released: {} (waiting for prefix cue to finish)",
                    self.cycle.hotkey
                ));
            }
            CueState::KeyHeld => {
                self.sink.info(format!("hotkey released: {}", self.cycle.hotkey));
                self.finish_hold();
            }
            CueState::Idle | CueState::PlayingSuffix => {
                debug!(state = %self.state, "release ignored");
            }
        }
    }

    /// The live playback session ended
    pub(crate) fn on_playback_complete(&mut self, outcome: PlaybackOutcome) {
        if outcome == PlaybackOutcome::Stopped {
            debug!(state = %self.state, "playback was stopped before it finished");
        }

        match self.state {
            CueState::PlayingPrefix => {
                if self.key_released {
                    self.sink
                        .info("prefix cue finished, hotkey was released meanwhile");
                    self.finish_hold();
                } else {
                    self.transition(CueState::KeyHeld);
                }
            }
            CueState::PlayingSuffix => {
                self.release_key();
                self.transition(CueState::Idle);
            }
            CueState::Idle | CueState::KeyHeld => {
                warn!(state = %self.state, "completion with no cue playing, ignored");
            }
        }
    }

    /// Stop playback and make sure the synthetic key is up. Leaves the
    /// engine Idle whatever state it was in.
    pub(crate) fn shutdown(&mut self) {
        self.playback.stop();
        self.pending = None;
        if self.key_down {
            self.release_key();
        }
        self.key_released = false;
        self.transition(CueState::Idle);
    }

    /// Hotkey is up and no prefix is playing: close the transmission
    fn finish_hold(&mut self) {
        if !self.cycle.suffix_enabled {
            self.transition(CueState::Idle);
            return;
        }

        if let Err(e) = self.press_key() {
            self.sink.error(format!(
                "failed to hold {} for the suffix cue: {}",
                self.cycle.hotkey, e
            ));
            self.transition(CueState::Idle);
            return;
        }

        match self.start_cue(Cue::Suffix) {
            Ok(()) => self.transition(CueState::PlayingSuffix),
            Err(e) => self.abort_cycle(Cue::Suffix, e),
        }
    }

    fn start_cue(&mut self, cue: Cue) -> Result<(), PlaybackError> {
        let path = match self.cycle.sound(cue) {
            Some(path) => path.to_path_buf(),
            None => {
                self.sink
                    .warning(format!("{} cue has no sound file configured", cue));
                return Err(PlaybackError::FileNotFound(PathBuf::new()));
            }
        };

        let completion = self.playback.play(&path)?;
        self.pending = Some(completion);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.sink.info(format!("playing {} cue: {}", cue, name));
        Ok(())
    }

    /// Playback failed: log, undo any key-down from this cycle, go Idle
    fn abort_cycle(&mut self, cue: Cue, err: PlaybackError) {
        self.sink.error(format!("{} cue playback failed: {}", cue, err));
        self.pending = None;
        if self.key_down {
            self.release_key();
        }
        self.key_released = false;
        self.transition(CueState::Idle);
    }

    fn press_key(&mut self) -> Result<(), InjectError> {
        if self.key_down {
            warn!(key = %self.cycle.hotkey, "synthetic key already down, not pressing again");
            return Ok(());
        }
        self.injector.press_down(self.cycle.hotkey)?;
        self.key_down = true;
        debug!(key = %self.cycle.hotkey, "synthetic key down");
        Ok(())
    }

    fn release_key(&mut self) {
        if !self.key_down {
            warn!(key = %self.cycle.hotkey, "no synthetic key-down outstanding, not releasing");
            return;
        }
        // the key is considered up even if injection fails; retrying could
        // only repeat the failure
        self.key_down = false;
        match self.injector.release_up(self.cycle.hotkey) {
            Ok(()) => self
                .sink
                .info(format!("cue finished, released {}", self.cycle.hotkey)),
            Err(e) => self.sink.error(format!(
                "failed to release {}: {}",
                self.cycle.hotkey, e
            )),
        }
    }

    fn transition(&mut self, next: CueState) {
        let prev = self.state;
        if prev == next {
            return;
        }

        info!(from = %prev, to = %next, "cue transition");
        self.state = next;
        self.state_tx.send_replace(next);
        self.sink.emit(CueEvent::StateChanged {
            from: prev,
            to: next,
        });
    }
}

/// Resolves with the pending session's outcome; never resolves when idle
async fn wait_for(pending: &mut Option<Completion>) -> PlaybackOutcome {
    match pending.as_mut() {
        // a dropped sender means the port went away mid-session
        Some(completion) => completion.await.unwrap_or(PlaybackOutcome::Stopped),
        None => std::future::pending().await,
    }
}

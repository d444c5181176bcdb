//! Listening session: one key monitor feeding one cue engine
//!
//! A session owns the two tasks and the channels between them. Stopping it
//! stops the monitor first, then waits for the engine to tear down, so the
//! synthetic key is always up once `stop` returns.

mod controller;

pub use controller::{ControlError, Controller, DepsFactory, PlatformDeps};

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::PlaybackPort;
use crate::config::{ConfigError, CueConfig};
use crate::cue::{CueEngine, CueState};
use crate::events::LogSink;
use crate::hotkey::{KeyMonitor, KeyStateSource, PollError};
use crate::keysim::KeyInjector;

/// Edges buffered between the monitor and the engine
const HOTKEY_CHANNEL_CAPACITY: usize = 32;

/// The platform ports a session drives
pub struct SessionDeps {
    pub source: Arc<dyn KeyStateSource>,
    pub playback: Box<dyn PlaybackPort>,
    pub injector: Box<dyn KeyInjector>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("hotkey polling failed: {0}")]
    Polling(#[from] PollError),

    #[error("session task failed: {0}")]
    Task(String),
}

/// A running key monitor and cue engine pair
pub struct ListeningSession {
    config_tx: watch::Sender<CueConfig>,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<CueState>,
    monitor: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<Result<(), PollError>>>,
}

impl ListeningSession {
    /// Validate `config` and spawn the monitor and engine tasks
    pub fn start(config: CueConfig, deps: SessionDeps, sink: LogSink) -> Result<Self, ConfigError> {
        config.validate()?;

        let hotkey = config.hotkey;
        let interval = config.poll_interval;
        let (config_tx, config_rx) = watch::channel(config);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (hotkey_tx, hotkey_rx) = mpsc::channel(HOTKEY_CHANNEL_CAPACITY);

        let engine = CueEngine::new(config_rx, deps.playback, deps.injector, sink);
        let state_rx = engine.subscribe_state();
        let monitor = KeyMonitor::new(deps.source, hotkey, interval);

        let engine = tokio::spawn(engine.run(hotkey_rx, stop_rx.clone()));
        let monitor = tokio::spawn(monitor.run(hotkey_tx, stop_rx));

        info!(%hotkey, "listening session started");

        Ok(Self {
            config_tx,
            stop_tx,
            state_rx,
            monitor: Some(monitor),
            engine: Some(engine),
        })
    }

    /// Current cue state
    pub fn state(&self) -> CueState {
        *self.state_rx.borrow()
    }

    /// Config the next cue cycle will use
    pub fn config(&self) -> CueConfig {
        self.config_tx.borrow().clone()
    }

    /// Publish a new config; the engine takes it at its next cycle start.
    /// Hotkey, device and poll interval changes need a new session instead.
    pub fn update_config(&self, config: CueConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config_tx.send_replace(config);
        Ok(())
    }

    /// Resolves when the engine ends on its own (a polling failure).
    /// Cancel-safe: the handle is only consumed once it has completed.
    pub async fn finished(&mut self) -> Result<(), SessionError> {
        let Some(handle) = self.engine.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.engine = None;
        flatten(result)
    }

    /// Stop both tasks and wait for the engine's teardown
    pub async fn stop(mut self) -> Result<(), SessionError> {
        self.stop_tx.send_replace(true);

        if let Some(monitor) = self.monitor.take() {
            monitor
                .await
                .map_err(|e| SessionError::Task(e.to_string()))?;
        }
        let result = match self.engine.take() {
            Some(engine) => flatten(engine.await),
            None => Ok(()),
        };

        info!("listening session stopped");
        result
    }
}

impl Drop for ListeningSession {
    fn drop(&mut self) {
        if self.engine.is_some() {
            debug!("listening session dropped while running, signalling stop");
        }
        self.stop_tx.send_replace(true);
    }
}

fn flatten(
    result: Result<Result<(), PollError>, tokio::task::JoinError>,
) -> Result<(), SessionError> {
    match result {
        Ok(inner) => inner.map_err(SessionError::from),
        Err(e) => Err(SessionError::Task(e.to_string())),
    }
}

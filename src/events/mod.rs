//! Observability events
//!
//! Human-readable log lines and state changes are published on a broadcast
//! channel for IPC subscribers and mirrored to `tracing`. Publishing never
//! blocks and never fails the caller.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::cue::CueState;

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Success => write!(f, "OK"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Events published by the cue engine and session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CueEvent {
    /// A log line for the operator
    Log { message: String, severity: Severity },

    /// The cue engine changed state
    StateChanged { from: CueState, to: CueState },

    /// A listening session started
    ListeningStarted { hotkey: String },

    /// The listening session ended
    ListeningStopped,
}

impl std::fmt::Display for CueEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CueEvent::Log { message, severity } => write!(f, "[{}] {}", severity, message),
            CueEvent::StateChanged { from, to } => write!(f, "STATE {} -> {}", from, to),
            CueEvent::ListeningStarted { hotkey } => write!(f, "LISTENING ({})", hotkey),
            CueEvent::ListeningStopped => write!(f, "STOPPED"),
        }
    }
}

/// Observability sink handed to every component that reports to the operator
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: broadcast::Sender<CueEvent>,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CueEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody is listening
    pub fn emit(&self, event: CueEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info | Severity::Success => info!(%severity, "{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
        self.emit(CueEvent::Log { message, severity });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }
}

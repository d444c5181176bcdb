//! Synthetic key events toward the downstream voice client
//!
//! The cue engine talks to a `KeyInjector`; the real implementation drives
//! enigo from its own thread so the injector can be moved into the engine
//! task on every platform.

use std::sync::mpsc;
use std::thread;

use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use tracing::{debug, error, info};

use crate::blocking::recv_reply;
use crate::hotkey::KeyCode;

/// Errors from key injection
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("failed to create keyboard simulator: {0}")]
    Init(String),

    #[error("key injection failed: {0}")]
    Inject(String),

    #[error("key {0} cannot be injected on this platform")]
    Unsupported(KeyCode),

    #[error("key injector thread exited")]
    ThreadExited,
}

/// Injects key-down / key-up events into the OS input queue
pub trait KeyInjector: Send {
    fn press_down(&mut self, key: KeyCode) -> Result<(), InjectError>;
    fn release_up(&mut self, key: KeyCode) -> Result<(), InjectError>;
}

struct InjectRequest {
    key: KeyCode,
    direction: Direction,
    reply: mpsc::Sender<Result<(), InjectError>>,
}

/// enigo-backed injector running on a dedicated thread
pub struct EnigoInjector {
    request_tx: mpsc::Sender<InjectRequest>,
}

impl EnigoInjector {
    /// Create the simulator and start its thread
    pub fn spawn() -> Result<Self, InjectError> {
        let (request_tx, request_rx) = mpsc::channel::<InjectRequest>();
        let (ready_tx, ready_rx) = mpsc::channel();

        thread::Builder::new()
            .name("key-injector".to_string())
            .spawn(move || {
                let mut enigo = match Enigo::new(&Settings::default()) {
                    Ok(enigo) => {
                        let _ = ready_tx.send(Ok(()));
                        enigo
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(InjectError::Init(e.to_string())));
                        return;
                    }
                };

                while let Ok(request) = request_rx.recv() {
                    let result = inject(&mut enigo, request.key, request.direction);
                    let _ = request.reply.send(result);
                }
                debug!("key injector thread stopped");
            })
            .map_err(|e| InjectError::Init(e.to_string()))?;

        recv_reply(&ready_rx).map_err(|_| InjectError::ThreadExited)??;
        info!("key injector ready");

        Ok(Self { request_tx })
    }

    fn send(&self, key: KeyCode, direction: Direction) -> Result<(), InjectError> {
        let (reply, reply_rx) = mpsc::channel();
        self.request_tx
            .send(InjectRequest {
                key,
                direction,
                reply,
            })
            .map_err(|_| InjectError::ThreadExited)?;
        recv_reply(&reply_rx).map_err(|_| InjectError::ThreadExited)?
    }
}

impl KeyInjector for EnigoInjector {
    fn press_down(&mut self, key: KeyCode) -> Result<(), InjectError> {
        self.send(key, Direction::Press)
    }

    fn release_up(&mut self, key: KeyCode) -> Result<(), InjectError> {
        self.send(key, Direction::Release)
    }
}

fn inject(enigo: &mut Enigo, key: KeyCode, direction: Direction) -> Result<(), InjectError> {
    let target = enigo_key(key).ok_or(InjectError::Unsupported(key))?;
    enigo.key(target, direction).map_err(|e| {
        error!(%key, %e, "key injection failed");
        InjectError::Inject(e.to_string())
    })
}

fn enigo_key(key: KeyCode) -> Option<Key> {
    let mapped = match key {
        KeyCode::Letter(c) => Key::Unicode(c.to_ascii_lowercase()),
        KeyCode::Digit(c) => Key::Unicode(c),
        KeyCode::Function(n) => match n {
            1 => Key::F1,
            2 => Key::F2,
            3 => Key::F3,
            4 => Key::F4,
            5 => Key::F5,
            6 => Key::F6,
            7 => Key::F7,
            8 => Key::F8,
            9 => Key::F9,
            10 => Key::F10,
            11 => Key::F11,
            12 => Key::F12,
            _ => return None,
        },
        KeyCode::Space => Key::Space,
        KeyCode::Tab => Key::Tab,
        KeyCode::CapsLock => Key::CapsLock,
        KeyCode::Escape => Key::Escape,
        KeyCode::Return => Key::Return,
        KeyCode::Backquote => Key::Unicode('`'),
        KeyCode::Control => Key::Control,
        KeyCode::Shift => Key::Shift,
        KeyCode::Alt => Key::Alt,
    };
    Some(mapped)
}

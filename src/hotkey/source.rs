//! Raw physical key state queries
//!
//! On macOS the combined session key state is read straight from
//! CoreGraphics. Elsewhere a background rdev listener keeps a set of the
//! keys currently held and the query reads that set.

use std::sync::Arc;

use super::keys::KeyCode;

/// Errors raised while sampling key state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("input backend is unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to query key state: {0}")]
    Query(String),
}

/// Something that can report whether a key is physically held right now
pub trait KeyStateSource: Send + Sync {
    /// Sample the current state of `key`
    fn is_down(&self, key: KeyCode) -> Result<bool, PollError>;
}

/// Create the key state source for the current platform
pub fn platform_source() -> Result<Arc<dyn KeyStateSource>, PollError> {
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(macos::CoreGraphicsKeyState))
    }

    #[cfg(not(target_os = "macos"))]
    {
        let source: Arc<dyn KeyStateSource> = rdev_backend::RdevKeyState::shared()?;
        Ok(source)
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use core_graphics::event::CGKeyCode;
    use core_graphics::event_source::CGEventSourceStateID;

    use super::{KeyCode, KeyStateSource, PollError};

    #[link(name = "CoreGraphics", kind = "framework")]
    extern "C" {
        fn CGEventSourceKeyState(state_id: i32, key: CGKeyCode) -> bool;
    }

    /// Reads key state from the combined session event source
    pub struct CoreGraphicsKeyState;

    impl KeyStateSource for CoreGraphicsKeyState {
        fn is_down(&self, key: KeyCode) -> Result<bool, PollError> {
            let codes = virtual_keycodes(key);
            if codes.is_empty() {
                return Err(PollError::Query(format!("no macOS keycode for {}", key)));
            }
            let state_id = CGEventSourceStateID::CombinedSessionState as i32;
            // SAFETY: CGEventSourceKeyState only reads global input state
            Ok(codes
                .iter()
                .any(|code| unsafe { CGEventSourceKeyState(state_id, *code) }))
        }
    }

    /// ANSI virtual keycodes (kVK_*) for a key; both sides for modifiers
    fn virtual_keycodes(key: KeyCode) -> Vec<CGKeyCode> {
        let single = |code: CGKeyCode| vec![code];
        match key {
            KeyCode::Letter(c) => letter_keycode(c).map(single).unwrap_or_default(),
            KeyCode::Digit(c) => digit_keycode(c).map(single).unwrap_or_default(),
            KeyCode::Function(n) => function_keycode(n).map(single).unwrap_or_default(),
            KeyCode::Space => single(0x31),
            KeyCode::Tab => single(0x30),
            KeyCode::CapsLock => single(0x39),
            KeyCode::Escape => single(0x35),
            KeyCode::Return => single(0x24),
            KeyCode::Backquote => single(0x32),
            KeyCode::Control => vec![0x3B, 0x3E],
            KeyCode::Shift => vec![0x38, 0x3C],
            KeyCode::Alt => vec![0x3A, 0x3D],
        }
    }

    fn letter_keycode(c: char) -> Option<CGKeyCode> {
        let code = match c {
            'A' => 0x00,
            'S' => 0x01,
            'D' => 0x02,
            'F' => 0x03,
            'H' => 0x04,
            'G' => 0x05,
            'Z' => 0x06,
            'X' => 0x07,
            'C' => 0x08,
            'V' => 0x09,
            'B' => 0x0B,
            'Q' => 0x0C,
            'W' => 0x0D,
            'E' => 0x0E,
            'R' => 0x0F,
            'Y' => 0x10,
            'T' => 0x11,
            'O' => 0x1F,
            'U' => 0x20,
            'I' => 0x22,
            'P' => 0x23,
            'L' => 0x25,
            'J' => 0x26,
            'K' => 0x28,
            'N' => 0x2D,
            'M' => 0x2E,
            _ => return None,
        };
        Some(code)
    }

    fn digit_keycode(c: char) -> Option<CGKeyCode> {
        let code = match c {
            '1' => 0x12,
            '2' => 0x13,
            '3' => 0x14,
            '4' => 0x15,
            '6' => 0x16,
            '5' => 0x17,
            '9' => 0x19,
            '7' => 0x1A,
            '8' => 0x1C,
            '0' => 0x1D,
            _ => return None,
        };
        Some(code)
    }

    fn function_keycode(n: u8) -> Option<CGKeyCode> {
        let code = match n {
            1 => 0x7A,
            2 => 0x78,
            3 => 0x63,
            4 => 0x76,
            5 => 0x60,
            6 => 0x61,
            7 => 0x62,
            8 => 0x64,
            9 => 0x65,
            10 => 0x6D,
            11 => 0x67,
            12 => 0x6F,
            _ => return None,
        };
        Some(code)
    }
}

#[cfg(not(target_os = "macos"))]
mod rdev_backend {
    use std::sync::{Arc, Mutex, OnceLock};
    use std::thread;

    use rdev::{listen, Event, EventType, Key};
    use tracing::{error, info};

    use super::{KeyCode, KeyStateSource, PollError};

    /// Keys currently held, as seen by the global rdev listener
    ///
    /// rdev offers no way to stop a listener, so one instance lives for the
    /// whole process and every listening session samples it.
    pub struct RdevKeyState {
        pressed: Mutex<Vec<Key>>,
        failure: Mutex<Option<String>>,
    }

    static SHARED: OnceLock<Arc<RdevKeyState>> = OnceLock::new();

    impl RdevKeyState {
        pub fn shared() -> Result<Arc<Self>, PollError> {
            if let Some(state) = SHARED.get() {
                return Ok(Arc::clone(state));
            }

            let candidate = Arc::new(Self {
                pressed: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
            });
            let state = Arc::clone(SHARED.get_or_init(|| Arc::clone(&candidate)));
            if !Arc::ptr_eq(&state, &candidate) {
                // another caller won the race and owns the listener thread
                return Ok(state);
            }

            let listener_state = Arc::clone(&state);
            thread::Builder::new()
                .name("key-state".to_string())
                .spawn(move || {
                    info!("key state listener thread started");
                    let callback_state = Arc::clone(&listener_state);
                    let callback = move |event: Event| callback_state.record(&event);

                    // listen() only returns on failure
                    if let Err(e) = listen(callback) {
                        error!(?e, "key state listener failed");
                        let mut failure = listener_state
                            .failure
                            .lock()
                            .unwrap_or_else(|p| p.into_inner());
                        *failure = Some(format!("{:?}", e));
                    }
                })
                .map_err(|e| PollError::BackendUnavailable(e.to_string()))?;

            Ok(state)
        }

        fn record(&self, event: &Event) {
            let mut pressed = self.pressed.lock().unwrap_or_else(|p| p.into_inner());
            match event.event_type {
                EventType::KeyPress(key) => {
                    if !pressed.contains(&key) {
                        pressed.push(key);
                    }
                }
                EventType::KeyRelease(key) => pressed.retain(|k| *k != key),
                _ => {}
            }
        }
    }

    impl KeyStateSource for RdevKeyState {
        fn is_down(&self, key: KeyCode) -> Result<bool, PollError> {
            if let Some(reason) = self
                .failure
                .lock()
                .map_err(|_| PollError::Query("listener state poisoned".to_string()))?
                .clone()
            {
                return Err(PollError::BackendUnavailable(reason));
            }

            let pressed = self
                .pressed
                .lock()
                .map_err(|_| PollError::Query("listener state poisoned".to_string()))?;
            Ok(pressed.iter().any(|k| key_matches(key, *k)))
        }
    }

    pub(super) fn key_matches(code: KeyCode, key: Key) -> bool {
        match code {
            KeyCode::Control => matches!(key, Key::ControlLeft | Key::ControlRight),
            KeyCode::Shift => matches!(key, Key::ShiftLeft | Key::ShiftRight),
            KeyCode::Alt => matches!(key, Key::Alt | Key::AltGr),
            other => rdev_key(other) == Some(key),
        }
    }

    fn rdev_key(code: KeyCode) -> Option<Key> {
        let key = match code {
            KeyCode::Letter(c) => letter_key(c)?,
            KeyCode::Digit(c) => digit_key(c)?,
            KeyCode::Function(n) => function_key(n)?,
            KeyCode::Space => Key::Space,
            KeyCode::Tab => Key::Tab,
            KeyCode::CapsLock => Key::CapsLock,
            KeyCode::Escape => Key::Escape,
            KeyCode::Return => Key::Return,
            KeyCode::Backquote => Key::BackQuote,
            KeyCode::Control => Key::ControlLeft,
            KeyCode::Shift => Key::ShiftLeft,
            KeyCode::Alt => Key::Alt,
        };
        Some(key)
    }

    fn letter_key(c: char) -> Option<Key> {
        let key = match c {
            'A' => Key::KeyA,
            'B' => Key::KeyB,
            'C' => Key::KeyC,
            'D' => Key::KeyD,
            'E' => Key::KeyE,
            'F' => Key::KeyF,
            'G' => Key::KeyG,
            'H' => Key::KeyH,
            'I' => Key::KeyI,
            'J' => Key::KeyJ,
            'K' => Key::KeyK,
            'L' => Key::KeyL,
            'M' => Key::KeyM,
            'N' => Key::KeyN,
            'O' => Key::KeyO,
            'P' => Key::KeyP,
            'Q' => Key::KeyQ,
            'R' => Key::KeyR,
            'S' => Key::KeyS,
            'T' => Key::KeyT,
            'U' => Key::KeyU,
            'V' => Key::KeyV,
            'W' => Key::KeyW,
            'X' => Key::KeyX,
            'Y' => Key::KeyY,
            'Z' => Key::KeyZ,
            _ => return None,
        };
        Some(key)
    }

    fn digit_key(c: char) -> Option<Key> {
        let key = match c {
            '0' => Key::Num0,
            '1' => Key::Num1,
            '2' => Key::Num2,
            '3' => Key::Num3,
            '4' => Key::Num4,
            '5' => Key::Num5,
            '6' => Key::Num6,
            '7' => Key::Num7,
            '8' => Key::Num8,
            '9' => Key::Num9,
            _ => return None,
        };
        Some(key)
    }

    fn function_key(n: u8) -> Option<Key> {
        let key = match n {
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
        };
        Some(key)
    }
}

//! rodio-backed playback on a dedicated output thread
//!
//! The cpal output stream is not `Send`, so it lives on its own thread for
//! the lifetime of the port. Requests reach it over a std channel and are
//! answered synchronously; between requests the thread polls the active
//! sink so natural completion is reported within a few milliseconds.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, info, warn};

use crate::blocking::recv_reply;

use super::playback::{Completion, PlaybackError, PlaybackPort, SessionSlot, Voice};

/// How often the output thread checks whether the active sink has drained
const REAP_INTERVAL: Duration = Duration::from_millis(5);

/// Errors opening or enumerating output devices
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output device '{0}' not found (run `rogerthat devices` to list them)")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Enumerate(String),

    #[error("failed to open output stream: {0}")]
    Stream(String),

    #[error("failed to spawn audio output thread: {0}")]
    ThreadSpawn(String),

    #[error("audio output thread exited")]
    ThreadExited,
}

enum OutputCommand {
    Play {
        path: PathBuf,
        reply: mpsc::Sender<Result<Completion, PlaybackError>>,
    },
    Stop {
        reply: mpsc::Sender<()>,
    },
}

/// Playback port driving a rodio sink on the selected output device
pub struct RodioPlayback {
    command_tx: mpsc::Sender<OutputCommand>,
    device: String,
}

impl RodioPlayback {
    /// Open `device` (or the system default) and start the output thread
    pub fn open(device: Option<&str>) -> Result<Self, OutputError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let wanted = device.map(str::to_owned);

        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let (_stream, handle, name) = match open_stream(wanted.as_deref()) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(name));
                run_output_loop(&handle, command_rx);
                debug!("audio output thread stopped");
            })
            .map_err(|e| OutputError::ThreadSpawn(e.to_string()))?;

        let device = recv_reply(&ready_rx).map_err(|_| OutputError::ThreadExited)??;
        info!(%device, "audio output opened");

        Ok(Self { command_tx, device })
    }

    /// Name of the device this port plays on
    pub fn device(&self) -> &str {
        &self.device
    }

    fn thread_gone() -> PlaybackError {
        PlaybackError::DeviceUnavailable("audio output thread exited".to_string())
    }
}

impl PlaybackPort for RodioPlayback {
    fn play(&mut self, path: &Path) -> Result<Completion, PlaybackError> {
        let (reply, reply_rx) = mpsc::channel();
        self.command_tx
            .send(OutputCommand::Play {
                path: path.to_path_buf(),
                reply,
            })
            .map_err(|_| Self::thread_gone())?;
        recv_reply(&reply_rx).map_err(|_| Self::thread_gone())?
    }

    fn stop(&mut self) {
        let (reply, reply_rx) = mpsc::channel();
        if self.command_tx.send(OutputCommand::Stop { reply }).is_ok() {
            let _ = recv_reply(&reply_rx);
        }
    }
}

impl Voice for Sink {
    fn is_finished(&self) -> bool {
        self.empty()
    }

    fn halt(self) {
        self.stop();
    }
}

fn run_output_loop(handle: &OutputStreamHandle, commands: mpsc::Receiver<OutputCommand>) {
    let mut slot: SessionSlot<Sink> = SessionSlot::new();

    loop {
        match commands.recv_timeout(REAP_INTERVAL) {
            Ok(OutputCommand::Play { path, reply }) => {
                slot.stop();
                let result = start_sink(handle, &path).map(|sink| slot.begin(sink, path));
                let _ = reply.send(result);
            }
            Ok(OutputCommand::Stop { reply }) => {
                if slot.stop() {
                    debug!("playback stopped");
                }
                let _ = reply.send(());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                slot.stop();
                break;
            }
        }

        if let Some(path) = slot.reap() {
            debug!(?path, "playback finished");
        }
    }
}

fn start_sink(handle: &OutputStreamHandle, path: &Path) -> Result<Sink, PlaybackError> {
    let file = File::open(path).map_err(|e| PlaybackError::from_open(path, e))?;
    let source = Decoder::new(BufReader::new(file)).map_err(|e| PlaybackError::DecodeError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let sink =
        Sink::try_new(handle).map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
    sink.append(source);
    Ok(sink)
}

fn open_stream(
    wanted: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle, String), OutputError> {
    let Some(wanted) = wanted else {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| OutputError::Stream(e.to_string()))?;
        return Ok((stream, handle, "default".to_string()));
    };

    let host = rodio::cpal::default_host();
    let devices: Vec<_> = host
        .output_devices()
        .map_err(|e| OutputError::Enumerate(e.to_string()))?
        .collect();
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();

    let index = match_device_name(&names, wanted)
        .ok_or_else(|| OutputError::DeviceNotFound(wanted.to_string()))?;
    let (stream, handle) = OutputStream::try_from_device(&devices[index])
        .map_err(|e| OutputError::Stream(e.to_string()))?;

    Ok((stream, handle, names[index].clone()))
}

/// Names of all output devices on the default host
pub fn list_output_devices() -> Result<Vec<String>, OutputError> {
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| OutputError::Enumerate(e.to_string()))?;

    let mut names = Vec::new();
    for device in devices {
        match device.name() {
            Ok(name) => names.push(name),
            Err(e) => warn!(%e, "skipping output device without a name"),
        }
    }
    Ok(names)
}

/// Pick a device by exact name, then by case-insensitive containment
/// in either direction. A blank name matches nothing.
pub fn match_device_name(names: &[String], wanted: &str) -> Option<usize> {
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return None;
    }
    if let Some(i) = names.iter().position(|n| n == wanted) {
        return Some(i);
    }

    let wanted = wanted.to_lowercase();
    names.iter().position(|n| {
        let name = n.to_lowercase();
        !name.is_empty() && (name.contains(&wanted) || wanted.contains(&name))
    })
}

//! Unix domain socket server for IPC
//!
//! Requests are forwarded to the session controller over a channel and
//! answered in order. A client that subscribes also gets every `CueEvent`
//! pushed on the same connection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::events::{CueEvent, LogSink};

use super::protocol::{read_frame, write_frame, FrameError, Request, Response};

/// A request waiting for the controller's answer
pub struct ControlRequest {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    control_tx: mpsc::Sender<ControlRequest>,
    sink: LogSink,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn new(
        socket_path: &Path,
        control_tx: mpsc::Sender<ControlRequest>,
        sink: LogSink,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("failed to bind {}", socket_path.display()))?;

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            control_tx,
            sink,
            shutdown_tx,
        })
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let control_tx = self.control_tx.clone();
                    let sink = self.sink.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, control_tx, sink) => {
                                if let Err(e) = result {
                                    warn!(%e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Disconnect clients and remove the socket file
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one connection: requests in order, events once subscribed
async fn handle_client(
    stream: UnixStream,
    control_tx: mpsc::Sender<ControlRequest>,
    sink: LogSink,
) -> Result<(), FrameError> {
    let (mut reader, mut writer) = stream.into_split();

    // Frame reads are not cancel-safe, so they run on their own task and
    // the loop below only selects over channels.
    let (request_tx, mut request_rx) = mpsc::channel::<Result<Request, String>>(8);
    let reader_task = tokio::spawn(async move {
        loop {
            let item = match read_frame::<_, Request>(&mut reader).await {
                Ok(Some(request)) => Ok(request),
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(FrameError::Json(e)) => Err(e.to_string()),
                Err(e) => {
                    warn!(%e, "dropping client");
                    break;
                }
            };
            if request_tx.send(item).await.is_err() {
                break;
            }
        }
    });

    let mut events: Option<broadcast::Receiver<CueEvent>> = None;
    let result = loop {
        tokio::select! {
            item = request_rx.recv() => {
                let response = match item {
                    None => break Ok(()),
                    Some(Err(e)) => Response::error("bad_request", e),
                    Some(Ok(Request::Subscribe)) => {
                        debug!("client subscribed to events");
                        events = Some(sink.subscribe());
                        Response::Subscribed
                    }
                    Some(Ok(request)) => forward(&control_tx, request).await,
                };
                if let Err(e) = write_frame(&mut writer, &response).await {
                    break Err(e);
                }
            }

            event = next_event(&mut events) => match event {
                Ok(event) => {
                    if let Err(e) = send_event(&mut writer, event).await {
                        break Err(e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => events = None,
            },
        }
    };

    reader_task.abort();
    result
}

/// Hand a request to the controller and wait for its answer
async fn forward(control_tx: &mpsc::Sender<ControlRequest>, request: Request) -> Response {
    let (reply, reply_rx) = oneshot::channel();
    if control_tx.send(ControlRequest { request, reply }).await.is_err() {
        return Response::error("unavailable", "daemon is shutting down");
    }
    reply_rx
        .await
        .unwrap_or_else(|_| Response::error("unavailable", "daemon is shutting down"))
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<CueEvent>>,
) -> Result<CueEvent, broadcast::error::RecvError> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(writer: &mut OwnedWriteHalf, event: CueEvent) -> Result<(), FrameError> {
    write_frame(writer, &Response::Event { event }).await
}

//! Client side of the IPC socket, used by the CLI subcommands

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::net::UnixStream;

use crate::events::CueEvent;

use super::protocol::{read_frame, write_frame, Request, Response};

async fn connect(socket_path: &Path) -> Result<UnixStream> {
    UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "cannot reach the daemon at {} (is `rogerthat run` running?)",
            socket_path.display()
        )
    })
}

/// Send one request and wait for its response
pub async fn request(socket_path: &Path, request: &Request) -> Result<Response> {
    let mut stream = connect(socket_path).await?;
    write_frame(&mut stream, request).await?;
    match read_frame(&mut stream).await? {
        Some(response) => Ok(response),
        None => bail!("daemon closed the connection without answering"),
    }
}

/// Subscribe and hand every pushed event to `on_event` until the daemon goes away
pub async fn follow(socket_path: &Path, mut on_event: impl FnMut(CueEvent)) -> Result<()> {
    let mut stream = connect(socket_path).await?;
    write_frame(&mut stream, &Request::Subscribe).await?;

    while let Some(response) = read_frame::<_, Response>(&mut stream).await? {
        match response {
            Response::Subscribed => {}
            Response::Event { event } => on_event(event),
            Response::Error { code, message } => bail!("{}: {}", code, message),
            other => tracing::debug!(?other, "unexpected message while following"),
        }
    }
    Ok(())
}

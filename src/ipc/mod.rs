//! IPC between the daemon and its command-line clients

mod client;
mod protocol;
mod server;

pub use client::{follow, request};
pub use protocol::{DaemonStatus, Request, Response};
pub use server::{ControlRequest, Server};

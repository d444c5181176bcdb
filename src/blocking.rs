//! Waiting on replies from ports that own a dedicated OS thread
//!
//! The audio and key injection ports answer over std channels. Each reply
//! arrives after one short operation on the owning thread (a file open and
//! decoder probe, or a single key event), so the wait is bounded. On a
//! multi-thread runtime the wait still moves off the worker with
//! `block_in_place` so other tasks keep running meanwhile.

use std::sync::mpsc;

use tokio::runtime::{Handle, RuntimeFlavor};

/// Block until the owning thread answers, or `Err` if it went away
pub fn recv_reply<T>(rx: &mpsc::Receiver<T>) -> Result<T, mpsc::RecvError> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| rx.recv())
        }
        // current-thread runtimes cannot hand the worker off
        _ => rx.recv(),
    }
}

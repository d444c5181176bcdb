//! Fixed-interval hotkey polling
//!
//! Samples the raw state of the monitored key every poll period and turns
//! changes between consecutive samples into `Pressed`/`Released` edges.
//! A press and release that both fall between two samples is not seen.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::keys::KeyCode;
use super::source::{KeyStateSource, PollError};

/// Events sent from the key monitor to the cue engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// The hotkey went down since the previous sample
    Pressed,
    /// The hotkey went up since the previous sample
    Released,
    /// Sampling failed; the monitor has stopped
    PollFailed(PollError),
}

/// Turns a stream of raw key samples into edges
#[derive(Debug, Default)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    /// Feed one sample, returning an edge if the state changed
    pub fn update(&mut self, down: bool) -> Option<HotkeyEvent> {
        let edge = match (self.last, down) {
            (false, true) => Some(HotkeyEvent::Pressed),
            (true, false) => Some(HotkeyEvent::Released),
            _ => None,
        };
        self.last = down;
        edge
    }
}

/// Polls one key and reports its edges
pub struct KeyMonitor {
    source: Arc<dyn KeyStateSource>,
    key: KeyCode,
    interval: Duration,
}

impl KeyMonitor {
    pub fn new(source: Arc<dyn KeyStateSource>, key: KeyCode, interval: Duration) -> Self {
        Self {
            source,
            key,
            interval,
        }
    }

    /// Run the poll loop until `stop_rx` flips to true or the receiver goes away
    ///
    /// Returns within one poll interval of a stop request. A sampling error is
    /// forwarded as `HotkeyEvent::PollFailed` and ends the loop.
    pub async fn run(self, event_tx: mpsc::Sender<HotkeyEvent>, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut edges = EdgeDetector::default();

        info!(
            key = %self.key,
            interval_ms = self.interval.as_millis() as u64,
            "key monitor started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            match self.source.is_down(self.key) {
                Ok(down) => {
                    if let Some(event) = edges.update(down) {
                        debug!(key = %self.key, ?event, "hotkey edge");
                        if event_tx.send(event).await.is_err() {
                            warn!("cue engine is gone, stopping key monitor");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(%e, "key state query failed");
                    let _ = event_tx.send(HotkeyEvent::PollFailed(e)).await;
                    break;
                }
            }
        }

        info!("key monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::time::timeout;

    use super::*;

    /// Replays a fixed list of samples, then repeats the last one
    struct ScriptedSource {
        samples: Mutex<Vec<Result<bool, PollError>>>,
        last: Mutex<bool>,
    }

    impl ScriptedSource {
        fn new(samples: Vec<Result<bool, PollError>>) -> Self {
            let mut samples = samples;
            samples.reverse();
            Self {
                samples: Mutex::new(samples),
                last: Mutex::new(false),
            }
        }
    }

    impl KeyStateSource for ScriptedSource {
        fn is_down(&self, key: KeyCode) -> Result<bool, PollError> {
            assert_eq!(key, KeyCode::Letter('K'));
            let mut last = self.last.lock().unwrap();
            match self.samples.lock().unwrap().pop() {
                Some(Ok(down)) => {
                    *last = down;
                    Ok(down)
                }
                Some(Err(e)) => Err(e),
                None => Ok(*last),
            }
        }
    }

    fn spawn_monitor(
        samples: Vec<Result<bool, PollError>>,
    ) -> (
        mpsc::Receiver<HotkeyEvent>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let source = Arc::new(ScriptedSource::new(samples));
        let monitor = KeyMonitor::new(source, KeyCode::Letter('K'), Duration::from_millis(1));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(event_tx, stop_rx));
        (event_rx, stop_tx, handle)
    }

    #[test]
    fn test_edge_detector() {
        let mut edges = EdgeDetector::default();
        assert_eq!(edges.update(false), None);
        assert_eq!(edges.update(true), Some(HotkeyEvent::Pressed));
        assert_eq!(edges.update(true), None);
        assert_eq!(edges.update(false), Some(HotkeyEvent::Released));
        assert_eq!(edges.update(false), None);
    }

    #[tokio::test]
    async fn test_monitor_emits_ordered_edges() {
        let samples = vec![Ok(false), Ok(true), Ok(true), Ok(false), Ok(true), Ok(false)];
        let (mut event_rx, stop_tx, handle) = spawn_monitor(samples);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let event = timeout(Duration::from_secs(2), event_rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                HotkeyEvent::Pressed,
                HotkeyEvent::Released,
                HotkeyEvent::Pressed,
                HotkeyEvent::Released,
            ]
        );

        stop_tx.send_replace(true);
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_monitor_stops_on_request() {
        let (_event_rx, stop_tx, handle) = spawn_monitor(vec![Ok(false)]);
        tokio::time::sleep(Duration::from_millis(5)).await;
        stop_tx.send_replace(true);
        timeout(Duration::from_millis(500), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_monitor_reports_poll_failure() {
        let samples = vec![
            Ok(true),
            Err(PollError::BackendUnavailable("no display".to_string())),
        ];
        let (mut event_rx, _stop_tx, handle) = spawn_monitor(samples);

        let first = timeout(Duration::from_secs(2), event_rx.recv()).await.unwrap();
        assert_eq!(first, Some(HotkeyEvent::Pressed));
        let second = timeout(Duration::from_secs(2), event_rx.recv()).await.unwrap();
        assert!(matches!(second, Some(HotkeyEvent::PollFailed(_))));

        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}

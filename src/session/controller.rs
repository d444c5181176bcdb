//! Session controller: owns the settings and at most one listening session
//!
//! Every IPC request that changes daemon state lands here, one at a time, so
//! start/stop/option changes never race each other.

use std::time::Instant;

use tracing::{debug, info};

use crate::audio::RodioPlayback;
use crate::config::{ConfigError, CueConfig, Settings};
use crate::cue::CueState;
use crate::events::{CueEvent, LogSink};
use crate::hotkey::platform_source;
use crate::ipc::{DaemonStatus, Request, Response};
use crate::keysim::EnigoInjector;

use super::{ListeningSession, SessionDeps, SessionError};

/// Builds the platform ports for a new session
pub trait DepsFactory: Send {
    fn build(&self, config: &CueConfig) -> Result<SessionDeps, ConfigError>;
}

/// Real key state, rodio output and enigo injection
pub struct PlatformDeps;

impl DepsFactory for PlatformDeps {
    fn build(&self, config: &CueConfig) -> Result<SessionDeps, ConfigError> {
        let source = platform_source().map_err(|e| ConfigError::Input(e.to_string()))?;
        let playback = RodioPlayback::open(config.output_device.as_deref())
            .map_err(|e| ConfigError::Device(e.to_string()))?;
        info!(device = playback.device(), "cue output opened");
        let injector = EnigoInjector::spawn().map_err(|e| ConfigError::Input(e.to_string()))?;

        Ok(SessionDeps {
            source,
            playback: Box::new(playback),
            injector: Box::new(injector),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControlError {
    /// Stable code reported to IPC clients
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Config(ConfigError::UnknownPreset(_)) => "unknown_preset",
            ControlError::Config(ConfigError::Device(_) | ConfigError::Input(_)) => {
                "backend_unavailable"
            }
            ControlError::Config(_) => "invalid_config",
        }
    }
}

pub struct Controller {
    settings: Settings,
    /// Preset the current cue config came from
    preset: Option<String>,
    /// Config the next session (or the running one) uses
    cue: CueConfig,
    session: Option<ListeningSession>,
    factory: Box<dyn DepsFactory>,
    sink: LogSink,
    started_at: Instant,
}

impl Controller {
    /// Resolve the initial cue config; `preset` overrides the file's choice
    pub fn new(
        settings: Settings,
        preset: Option<String>,
        factory: Box<dyn DepsFactory>,
        sink: LogSink,
    ) -> Result<Self, ConfigError> {
        let cue = settings.resolve(preset.as_deref())?;
        let preset = preset
            .or_else(|| settings.preset.clone())
            .and_then(|name| settings.find_preset(&name).map(|p| p.name.clone()));

        Ok(Self {
            settings,
            preset,
            cue,
            session: None,
            factory,
            sink,
            started_at: Instant::now(),
        })
    }

    pub fn is_listening(&self) -> bool {
        self.session.is_some()
    }

    /// Start listening with the current config
    pub fn start(&mut self) -> Result<(), ControlError> {
        if self.session.is_some() {
            self.sink.warning("already listening");
            return Ok(());
        }

        if let Err(e) = self.cue.validate() {
            self.sink.error(format!("cannot start listening: {}", e));
            return Err(e.into());
        }
        let deps = self.factory.build(&self.cue).map_err(|e| {
            self.sink.error(format!("cannot start listening: {}", e));
            e
        })?;
        let session = ListeningSession::start(self.cue.clone(), deps, self.sink.clone())?;
        self.session = Some(session);

        let hotkey = self.cue.hotkey.to_string();
        self.sink.success(format!("listening for {}", hotkey));
        self.sink.emit(CueEvent::ListeningStarted { hotkey });
        Ok(())
    }

    /// Stop the running session, if any. A session that already failed on
    /// its own is still stopped; its error is logged.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            self.sink.info("not listening");
            return;
        };

        if let Err(e) = session.stop().await {
            self.sink
                .warning(format!("listening session had already ended: {}", e));
        }
        self.sink.info("stopped listening");
        self.sink.emit(CueEvent::ListeningStopped);
    }

    /// Toggle the cue sounds; a running session picks them up at its next cycle
    pub async fn set_options(
        &mut self,
        prefix_enabled: Option<bool>,
        suffix_enabled: Option<bool>,
    ) -> Result<(), ControlError> {
        let mut next = self.cue.clone();
        if let Some(enabled) = prefix_enabled {
            next.prefix_enabled = enabled;
        }
        if let Some(enabled) = suffix_enabled {
            next.suffix_enabled = enabled;
        }
        let preset = self.preset.clone();
        self.apply(next, preset).await?;

        self.sink.info(format!(
            "prefix cue {}, suffix cue {}",
            on_off(self.cue.prefix_enabled),
            on_off(self.cue.suffix_enabled)
        ));
        Ok(())
    }

    /// Switch to a preset from the config file
    pub async fn apply_preset(&mut self, name: &str) -> Result<(), ControlError> {
        let next = self.settings.resolve(Some(name))?;
        let preset = self.settings.find_preset(name).map(|p| p.name.clone());
        self.apply(next, preset.clone()).await?;

        self.sink.success(format!(
            "preset '{}' applied",
            preset.as_deref().unwrap_or(name)
        ));
        Ok(())
    }

    /// Adopt `next`: live update when possible, restart when the hotkey,
    /// device or poll interval changed
    async fn apply(&mut self, next: CueConfig, preset: Option<String>) -> Result<(), ControlError> {
        if let Some(session) = &self.session {
            if self.cue.needs_restart(&next) {
                next.validate()?;
                debug!("config change needs a new session");
                self.stop().await;
                self.cue = next;
                self.preset = preset;
                return self.start();
            }
            session.update_config(next.clone())?;
        }

        self.cue = next;
        self.preset = preset;
        Ok(())
    }

    /// Resolves when the running session ends on its own. Cancel-safe.
    pub async fn session_ended(&mut self) -> Result<(), SessionError> {
        match self.session.as_mut() {
            Some(session) => session.finished().await,
            None => std::future::pending().await,
        }
    }

    /// Forget a session that ended on its own
    pub fn on_session_ended(&mut self, result: Result<(), SessionError>) {
        self.session = None;
        match result {
            Ok(()) => self.sink.warning("listening session ended"),
            Err(e) => self.sink.error(format!("listening stopped: {}", e)),
        }
        self.sink.emit(CueEvent::ListeningStopped);
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            listening: self.session.is_some(),
            state: self
                .session
                .as_ref()
                .map(ListeningSession::state)
                .unwrap_or(CueState::Idle),
            hotkey: self.cue.hotkey.to_string(),
            preset: self.preset.clone(),
            prefix_enabled: self.cue.prefix_enabled,
            suffix_enabled: self.cue.suffix_enabled,
            output_device: self.cue.output_device.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Process a request forwarded by the IPC server
    pub async fn handle_request(&mut self, request: Request) -> Response {
        debug!(?request, "control request");

        let result = match request {
            Request::Ping => return Response::Pong,
            Request::GetStatus => return Response::Status(self.status()),
            Request::Subscribe => {
                return Response::error("bad_request", "subscribe is handled per connection")
            }
            Request::StartListening => self
                .start()
                .map(|()| format!("listening for {}", self.cue.hotkey)),
            Request::StopListening => {
                self.stop().await;
                Ok("stopped".to_string())
            }
            Request::SetOptions {
                prefix_enabled,
                suffix_enabled,
            } => self
                .set_options(prefix_enabled, suffix_enabled)
                .await
                .map(|()| "options updated".to_string()),
            Request::ApplyPreset { name } => self
                .apply_preset(&name)
                .await
                .map(|()| format!("preset '{}' applied", name)),
        };

        match result {
            Ok(message) => Response::ok(message),
            Err(e) => Response::error(e.code(), e.to_string()),
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;
    use crate::events::Severity;
    use crate::hotkey::KeyCode;
    use crate::testing::{drain_logs, FakePlayback, RecordingInjector, Shared, ToggleSource};

    struct FakeFactory {
        rec: Shared,
        source: Arc<ToggleSource>,
        builds: Arc<AtomicUsize>,
    }

    impl DepsFactory for FakeFactory {
        fn build(&self, _config: &CueConfig) -> Result<SessionDeps, ConfigError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(SessionDeps {
                source: self.source.clone(),
                playback: Box::new(FakePlayback::new(&self.rec)),
                injector: Box::new(RecordingInjector::new(&self.rec)),
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        controller: Controller,
        source: Arc<ToggleSource>,
        builds: Arc<AtomicUsize>,
        sink: LogSink,
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn fixture_with(edit: impl FnOnce(&mut Settings)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let open = dir.path().join("open.wav");
        let close = dir.path().join("close.wav");
        std::fs::write(&open, b"RIFF").unwrap();
        std::fs::write(&close, b"RIFF").unwrap();

        let toml = format!(
            r#"
            [cue]
            hotkey = "K"
            prefix_sound = "{}"
            suffix_sound = "{}"
            poll_interval_ms = 1

            [[presets]]
            name = "Tower"
            hotkey = "Space"
            prefix_enabled = false
            suffix_enabled = true
            suffix_sound = "{}"

            [[presets]]
            name = "Quiet"
            prefix_enabled = false
            suffix_enabled = false
            "#,
            open.display(),
            close.display(),
            close.display(),
        );
        let mut settings = Settings::parse(&toml).unwrap();
        edit(&mut settings);

        let source = Arc::new(ToggleSource::default());
        let builds = Arc::new(AtomicUsize::new(0));
        let sink = LogSink::new(64);
        let factory = FakeFactory {
            rec: Arc::default(),
            source: source.clone(),
            builds: builds.clone(),
        };
        let controller = Controller::new(settings, None, Box::new(factory), sink.clone()).unwrap();

        Fixture {
            _dir: dir,
            controller,
            source,
            builds,
            sink,
        }
    }

    fn lifecycle_events(rx: &mut tokio::sync::broadcast::Receiver<CueEvent>) -> Vec<CueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if matches!(
                event,
                CueEvent::ListeningStarted { .. } | CueEvent::ListeningStopped
            ) {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut fx = fixture();
        let mut events = fx.sink.subscribe();

        let resp = fx.controller.handle_request(Request::StartListening).await;
        assert!(matches!(resp, Response::Ok { .. }));
        assert!(fx.controller.status().listening);

        // a second start is a no-op
        fx.controller.start().unwrap();
        assert_eq!(fx.builds.load(Ordering::SeqCst), 1);

        let resp = fx.controller.handle_request(Request::StopListening).await;
        assert!(matches!(resp, Response::Ok { .. }));
        assert!(!fx.controller.status().listening);
        assert_eq!(fx.controller.status().state, CueState::Idle);

        assert_eq!(
            lifecycle_events(&mut events),
            vec![
                CueEvent::ListeningStarted {
                    hotkey: "K".to_string()
                },
                CueEvent::ListeningStopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_start_refused_with_missing_sound() {
        let mut fx = fixture();
        fx.controller.cue.prefix_path = Some(PathBuf::from("/no/such/open.wav"));

        let resp = fx.controller.handle_request(Request::StartListening).await;
        match resp {
            Response::Error { code, message } => {
                assert_eq!(code, "invalid_config");
                assert!(message.contains("prefix"));
            }
            other => panic!("expected an error, got {:?}", other),
        }
        assert!(!fx.controller.is_listening());
        assert_eq!(fx.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_options_updates_live_session() {
        let mut fx = fixture();
        fx.controller.start().unwrap();

        let resp = fx
            .controller
            .handle_request(Request::SetOptions {
                prefix_enabled: None,
                suffix_enabled: Some(false),
            })
            .await;
        assert!(matches!(resp, Response::Ok { .. }));

        let status = fx.controller.status();
        assert!(status.listening);
        assert!(status.prefix_enabled);
        assert!(!status.suffix_enabled);
        assert_eq!(fx.builds.load(Ordering::SeqCst), 1);
        let session_config = fx.controller.session.as_ref().unwrap().config();
        assert!(!session_config.suffix_enabled);

        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn test_set_options_while_stopped() {
        let mut fx = fixture();
        fx.controller.set_options(Some(false), None).await.unwrap();

        let status = fx.controller.status();
        assert!(!status.listening);
        assert!(!status.prefix_enabled);
        assert_eq!(fx.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preset_with_new_hotkey_restarts_session() {
        let mut fx = fixture();
        fx.controller.start().unwrap();

        let resp = fx
            .controller
            .handle_request(Request::ApplyPreset {
                name: "tower".to_string(),
            })
            .await;
        assert!(matches!(resp, Response::Ok { .. }));

        let status = fx.controller.status();
        assert!(status.listening);
        assert_eq!(status.hotkey, "Space");
        assert_eq!(status.preset.as_deref(), Some("Tower"));
        assert!(!status.prefix_enabled);
        assert_eq!(fx.builds.load(Ordering::SeqCst), 2);

        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn test_preset_with_same_hotkey_updates_live() {
        let mut fx = fixture();
        fx.controller.start().unwrap();

        fx.controller.apply_preset("Quiet").await.unwrap();
        let status = fx.controller.status();
        assert_eq!(status.hotkey, "K");
        assert!(!status.prefix_enabled);
        assert!(!status.suffix_enabled);
        assert_eq!(fx.builds.load(Ordering::SeqCst), 1);

        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_preset() {
        let mut fx = fixture();
        let resp = fx
            .controller
            .handle_request(Request::ApplyPreset {
                name: "ghost".to_string(),
            })
            .await;
        assert!(matches!(resp, Response::Error { code, .. } if code == "unknown_preset"));
        assert_eq!(fx.controller.status().preset, None);
    }

    #[tokio::test]
    async fn test_invalid_live_update_keeps_old_config() {
        let mut fx = fixture();
        fx.controller.start().unwrap();
        fx.controller.apply_preset("Quiet").await.unwrap();

        // Quiet has no sounds, so turning the prefix back on must fail
        let err = fx.controller.set_options(Some(true), None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_config");
        assert!(!fx.controller.status().prefix_enabled);
        assert!(fx.controller.is_listening());

        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn test_session_ended_by_poll_failure() {
        let mut fx = fixture();
        let mut events = fx.sink.subscribe();
        fx.controller.start().unwrap();

        fx.source.fail();
        let result = timeout(Duration::from_secs(2), fx.controller.session_ended())
            .await
            .unwrap();
        assert!(matches!(result, Err(SessionError::Polling(_))));
        fx.controller.on_session_ended(result);

        assert!(!fx.controller.is_listening());
        assert_eq!(
            lifecycle_events(&mut events),
            vec![
                CueEvent::ListeningStarted {
                    hotkey: "K".to_string()
                },
                CueEvent::ListeningStopped,
            ]
        );
    }

    /// Fail the key source and give the engine time to die, without
    /// reaping the session through `session_ended`
    async fn kill_session(fx: &Fixture) {
        fx.source.fail();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_restart_over_a_session_that_already_failed() {
        let mut fx = fixture();
        let mut events = fx.sink.subscribe();
        fx.controller.start().unwrap();
        kill_session(&fx).await;

        fx.controller.apply_preset("Tower").await.unwrap();

        let status = fx.controller.status();
        assert!(status.listening);
        assert_eq!(status.hotkey, "Space");
        assert_eq!(status.preset.as_deref(), Some("Tower"));
        assert_eq!(fx.builds.load(Ordering::SeqCst), 2);
        let warnings = drain_logs(&mut events, Severity::Warning);
        assert!(warnings.iter().any(|m| m.contains("already ended")));
    }

    #[tokio::test]
    async fn test_stop_after_session_failed_reports_ok() {
        let mut fx = fixture();
        let mut events = fx.sink.subscribe();
        fx.controller.start().unwrap();
        kill_session(&fx).await;

        let resp = fx.controller.handle_request(Request::StopListening).await;
        assert!(matches!(resp, Response::Ok { .. }));
        assert!(!fx.controller.is_listening());
        assert_eq!(
            lifecycle_events(&mut events),
            vec![
                CueEvent::ListeningStarted {
                    hotkey: "K".to_string()
                },
                CueEvent::ListeningStopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_hotkey_override_survives_presets() {
        let mut fx = fixture_with(|s| s.hotkey_override = Some("F9".to_string()));
        fx.controller.start().unwrap();
        assert_eq!(fx.controller.status().hotkey, KeyCode::Function(9).to_string());

        // Tower binds Space, but the command-line key still wins
        fx.controller.apply_preset("Tower").await.unwrap();
        let status = fx.controller.status();
        assert_eq!(status.hotkey, KeyCode::Function(9).to_string());
        assert_eq!(status.preset.as_deref(), Some("Tower"));
        assert!(!status.prefix_enabled);
        // same key, so the running session was updated in place
        assert_eq!(fx.builds.load(Ordering::SeqCst), 1);
        let session_config = fx.controller.session.as_ref().unwrap().config();
        assert_eq!(session_config.hotkey, KeyCode::Function(9));

        fx.controller.stop().await;
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let mut fx = fixture();
        assert_eq!(fx.controller.handle_request(Request::Ping).await, Response::Pong);
        match fx.controller.handle_request(Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
                assert_eq!(status.hotkey, KeyCode::Letter('K').to_string());
                assert!(!status.listening);
            }
            other => panic!("expected status, got {:?}", other),
        }
    }
}

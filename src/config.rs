//! Configuration loading and management
//!
//! Settings come from a TOML file (defaults when it is missing), environment
//! overrides and an optional named preset. The resolved `CueConfig` is the
//! snapshot the cue engine consumes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::cue::Cue;
use crate::hotkey::{HotkeyError, KeyCode};

/// Poll period used when none is configured
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Errors that refuse a listening session before it starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid hotkey: {0}")]
    Hotkey(#[from] HotkeyError),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("{0} cue is enabled but no sound file is set")]
    MissingSound(Cue),

    #[error("{cue} cue file does not exist: {}", .path.display())]
    SoundNotFound { cue: Cue, path: PathBuf },

    #[error("poll interval must be greater than zero")]
    PollInterval,

    #[error("output device unavailable: {0}")]
    Device(String),

    #[error("input backend unavailable: {0}")]
    Input(String),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// File the settings were read from, if it existed
    pub source: Option<PathBuf>,

    /// Parsed settings
    pub settings: Settings,
}

/// Contents of the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Preset overlaid onto `[cue]` at startup
    pub preset: Option<String>,
    pub cue: CueSection,
    pub daemon: DaemonSection,
    pub presets: Vec<Preset>,
    /// Key given on the command line; wins over `[cue]` and every preset
    #[serde(skip)]
    pub hotkey_override: Option<String>,
}

/// `[cue]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CueSection {
    pub hotkey: String,
    pub prefix_enabled: bool,
    pub suffix_enabled: bool,
    pub prefix_sound: Option<PathBuf>,
    pub suffix_sound: Option<PathBuf>,
    /// Output device name; unset or "default" means the system default
    pub output_device: Option<String>,
    pub poll_interval_ms: u64,
}

impl Default for CueSection {
    fn default() -> Self {
        Self {
            hotkey: "K".to_string(),
            prefix_enabled: true,
            suffix_enabled: true,
            prefix_sound: None,
            suffix_sound: None,
            output_device: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// `[daemon]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub socket_path: Option<PathBuf>,
    /// Start listening as soon as the daemon is up
    pub auto_start: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: None,
            auto_start: true,
        }
    }
}

/// A named bundle of hotkey, enabled flags and cue sounds
#[derive(Debug, Clone, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hotkey: Option<String>,
    #[serde(default)]
    pub prefix_enabled: bool,
    #[serde(default)]
    pub suffix_enabled: bool,
    #[serde(default)]
    pub prefix_sound: Option<PathBuf>,
    #[serde(default)]
    pub suffix_sound: Option<PathBuf>,
}

/// Immutable snapshot the cue engine works from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueConfig {
    pub hotkey: KeyCode,
    pub prefix_enabled: bool,
    pub suffix_enabled: bool,
    pub prefix_path: Option<PathBuf>,
    pub suffix_path: Option<PathBuf>,
    pub output_device: Option<String>,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from `path` (or the default location), the
    /// environment and defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut settings = Settings::default();
        let mut source = None;
        if let Some(path) = config_path {
            if path.exists() {
                debug!(?path, "loading config");
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                settings = Settings::parse(&contents)
                    .with_context(|| format!("invalid config {}", path.display()))?;
                source = Some(path);
            } else {
                debug!(?path, "config file not found, using defaults");
            }
        }
        settings.apply_env();

        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .context("cannot determine a data directory")?
            .join("rogerthat");
        let socket_path = settings
            .daemon
            .socket_path
            .clone()
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        Ok(Self {
            socket_path,
            data_dir,
            source,
            settings,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// `<config_dir>/rogerthat/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rogerthat").join("config.toml"))
}

impl Settings {
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("ROGERTHAT_HOTKEY") {
            self.cue.hotkey = key;
        }
        if let Ok(device) = std::env::var("ROGERTHAT_OUTPUT_DEVICE") {
            self.cue.output_device = Some(device);
        }
    }

    pub fn find_preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Configured output device, with "default" and blank names mapped to
    /// `None`
    pub fn output_device(&self) -> Option<String> {
        normalize_device(self.cue.output_device.as_deref())
    }

    /// Resolve the cue snapshot, overlaying `preset` (or the file's selected
    /// preset when `None`) and then the command-line hotkey
    pub fn resolve(&self, preset: Option<&str>) -> Result<CueConfig, ConfigError> {
        let cue = &self.cue;
        let mut hotkey = cue.hotkey.clone();
        let mut prefix_enabled = cue.prefix_enabled;
        let mut suffix_enabled = cue.suffix_enabled;
        let mut prefix_path = cue.prefix_sound.clone();
        let mut suffix_path = cue.suffix_sound.clone();

        if let Some(name) = preset.or(self.preset.as_deref()) {
            let preset = self
                .find_preset(name)
                .ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?;
            if let Some(key) = &preset.hotkey {
                hotkey = key.clone();
            }
            prefix_enabled = preset.prefix_enabled;
            suffix_enabled = preset.suffix_enabled;
            prefix_path = preset.prefix_sound.clone();
            suffix_path = preset.suffix_sound.clone();
        }
        if let Some(key) = &self.hotkey_override {
            hotkey = key.clone();
        }

        Ok(CueConfig {
            hotkey: hotkey.parse()?,
            prefix_enabled,
            suffix_enabled,
            prefix_path,
            suffix_path,
            output_device: self.output_device(),
            poll_interval: Duration::from_millis(cue.poll_interval_ms),
        })
    }
}

impl CueConfig {
    /// Check everything that can be checked before a session starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::PollInterval);
        }
        if self.prefix_enabled {
            check_sound(Cue::Prefix, self.prefix_path.as_deref())?;
        }
        if self.suffix_enabled {
            check_sound(Cue::Suffix, self.suffix_path.as_deref())?;
        }
        Ok(())
    }

    pub fn sound(&self, cue: Cue) -> Option<&Path> {
        match cue {
            Cue::Prefix => self.prefix_path.as_deref(),
            Cue::Suffix => self.suffix_path.as_deref(),
        }
    }

    /// Whether switching to `other` needs a fresh session rather than a
    /// live update
    pub fn needs_restart(&self, other: &CueConfig) -> bool {
        self.hotkey != other.hotkey
            || self.output_device != other.output_device
            || self.poll_interval != other.poll_interval
    }
}

/// `None` for the system default: unset, blank or "default"
pub fn normalize_device(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("default"))
        .map(str::to_string)
}

fn check_sound(cue: Cue, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = path.ok_or(ConfigError::MissingSound(cue))?;
    if !path.is_file() {
        return Err(ConfigError::SoundNotFound {
            cue,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

// Command-line interface definitions for rogerthat

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rogerthat")]
#[command(author, version, about = "Radio-style cue sounds around a push-to-talk key")]
#[command(long_about = "
rogerthat watches your push-to-talk key and wraps every transmission in cue
sounds: an opening click when you press the key and a closing tone when you
let go. While the closing tone plays the key is held down for you, so the
voice client keeps transmitting until the cue is over.

USAGE:
  1. Put a prefix_sound and suffix_sound in ~/.config/rogerthat/config.toml
  2. Run: rogerthat check   (to validate the config)
  3. Run: rogerthat         (to start the daemon)
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Use a preset from the config file
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Override the push-to-talk key (e.g. K, F9, Space, CapsLock)
    #[arg(long, value_name = "KEY")]
    pub hotkey: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as daemon (default if no command specified)
    Run,

    /// List audio output devices
    Devices,

    /// Play a sound file on the cue output device
    Preview {
        /// Path to a WAV or MP3 file
        file: PathBuf,

        /// Output device name (defaults to the configured one)
        #[arg(long, value_name = "NAME")]
        device: Option<String>,
    },

    /// Validate the configuration and show the resolved settings
    Check,

    /// Show daemon status
    Status {
        /// Print the raw status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tell the daemon to start listening
    Start,

    /// Tell the daemon to stop listening
    Stop,

    /// Turn the prefix or suffix cue on or off
    Options {
        /// Play the opening cue (on/off)
        #[arg(long, value_name = "on|off", value_parser = BoolishValueParser::new())]
        prefix: Option<bool>,

        /// Play the closing cue (on/off)
        #[arg(long, value_name = "on|off", value_parser = BoolishValueParser::new())]
        suffix: Option<bool>,
    },

    /// Switch the daemon to a preset
    Preset {
        /// Preset name from the config file
        name: String,
    },

    /// Follow the daemon's log and state changes
    Logs,
}

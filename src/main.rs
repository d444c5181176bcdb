//! rogerthat: push-to-talk cue daemon
//!
//! The daemon watches one push-to-talk key and wraps each transmission in
//! cue sounds:
//! - Physical key state polling (CoreGraphics on macOS, rdev elsewhere)
//! - Cue state machine driving rodio playback and enigo key injection
//! - IPC server for status, start/stop, options, presets and log streaming

mod audio;
mod blocking;
mod cli;
mod config;
mod cue;
mod events;
mod hotkey;
mod ipc;
mod keysim;
mod lifecycle;
mod session;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{
    list_output_devices, match_device_name, PlaybackOutcome, PlaybackPort, RodioPlayback,
};
use crate::cli::{Cli, Commands};
use crate::config::{normalize_device, Config};
use crate::events::LogSink;
use crate::ipc::{ControlRequest, Request, Response, Server};
use crate::lifecycle::ShutdownSignal;
use crate::session::{Controller, PlatformDeps};

/// Events buffered per IPC subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("rogerthat={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    config.settings.hotkey_override = cli.hotkey;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, cli.preset).await?,
        Commands::Devices => show_devices(&config)?,
        Commands::Preview { file, device } => {
            let device = match device {
                Some(name) => normalize_device(Some(&name)),
                None => config.settings.output_device(),
            };
            preview(&file, device.as_deref()).await?;
        }
        Commands::Check => check_config(&config, cli.preset.as_deref())?,
        Commands::Status { json } => show_status(&config.socket_path, json).await?,
        Commands::Start => send(&config.socket_path, Request::StartListening).await?,
        Commands::Stop => send(&config.socket_path, Request::StopListening).await?,
        Commands::Options { prefix, suffix } => {
            if prefix.is_none() && suffix.is_none() {
                bail!("nothing to change: pass --prefix and/or --suffix");
            }
            let request = Request::SetOptions {
                prefix_enabled: prefix,
                suffix_enabled: suffix,
            };
            send(&config.socket_path, request).await?;
        }
        Commands::Preset { name } => {
            send(&config.socket_path, Request::ApplyPreset { name }).await?
        }
        Commands::Logs => {
            ipc::follow(&config.socket_path, |event| println!("{}", event)).await?;
        }
    }

    Ok(())
}

/// Run the daemon until SIGTERM/SIGINT
async fn run_daemon(config: Config, preset: Option<String>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "rogerthat daemon starting"
    );
    config.ensure_dirs()?;
    match &config.source {
        Some(path) => info!(?path, "configuration loaded"),
        None => info!("no config file found, using defaults"),
    }

    // Registered before anything else so an early Ctrl-C still shuts down cleanly
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let sink = LogSink::new(EVENT_CHANNEL_CAPACITY);
    let mut controller = Controller::new(
        config.settings.clone(),
        preset,
        Box::new(PlatformDeps),
        sink.clone(),
    )?;

    // IPC server -> controller
    let (control_tx, mut control_rx) = mpsc::channel::<ControlRequest>(32);
    let server = Arc::new(Server::new(&config.socket_path, control_tx, sink.clone())?);
    let server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(?e, "IPC server error");
            }
        })
    };

    if config.settings.daemon.auto_start {
        if let Err(e) = controller.start() {
            warn!(%e, "not listening; fix the configuration and run `rogerthat start`");
        }
    } else {
        info!("auto_start is off; run `rogerthat start` to begin listening");
    }

    info!("daemon initialized, entering main loop");

    loop {
        tokio::select! {
            Some(ControlRequest { request, reply }) = control_rx.recv() => {
                let response = controller.handle_request(request).await;
                let _ = reply.send(response);
            }

            result = controller.session_ended() => {
                controller.on_session_ended(result);
            }

            _ = shutdown.wait() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    if controller.is_listening() {
        controller.stop().await;
    }
    server.shutdown();
    server_task.abort();

    info!("rogerthat daemon stopped");

    Ok(())
}

fn show_devices(config: &Config) -> Result<()> {
    let devices = list_output_devices()?;
    if devices.is_empty() {
        println!("No audio output devices found.");
        return Ok(());
    }

    // Mark the device a session would open, not just an exact name match
    let selected = config
        .settings
        .output_device()
        .and_then(|wanted| match_device_name(&devices, &wanted));
    println!("Audio output devices:");
    for (i, name) in devices.iter().enumerate() {
        let marker = if selected == Some(i) { "*" } else { " " };
        println!(" {} {}", marker, name);
    }
    Ok(())
}

/// Play one file on the cue output and wait until it ends or Ctrl-C
async fn preview(file: &Path, device: Option<&str>) -> Result<()> {
    let mut playback = RodioPlayback::open(device)?;
    println!("Playing {} on {}", file.display(), playback.device());

    let completion = playback.play(file)?;
    tokio::select! {
        outcome = completion => {
            if let Ok(PlaybackOutcome::Stopped) = outcome {
                println!("Playback stopped.");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            playback.stop();
            println!("Playback interrupted.");
        }
    }
    Ok(())
}

fn check_config(config: &Config, preset: Option<&str>) -> Result<()> {
    match &config.source {
        Some(path) => println!("Config file:   {}", path.display()),
        None => println!("Config file:   (none, using defaults)"),
    }
    println!("Socket:        {}", config.socket_path.display());

    let cue = config.settings.resolve(preset)?;
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };
    let sound = |path: Option<&Path>| {
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    };

    if let Some(name) = preset.or(config.settings.preset.as_deref()) {
        println!("Preset:        {}", name);
    }
    println!("Hotkey:        {}", cue.hotkey);
    println!(
        "Prefix cue:    {} {}",
        on_off(cue.prefix_enabled),
        sound(cue.prefix_path.as_deref())
    );
    println!(
        "Suffix cue:    {} {}",
        on_off(cue.suffix_enabled),
        sound(cue.suffix_path.as_deref())
    );
    println!(
        "Output device: {}",
        cue.output_device.as_deref().unwrap_or("system default")
    );
    println!("Poll interval: {} ms", cue.poll_interval.as_millis());

    if !config.settings.presets.is_empty() {
        println!("Presets:");
        for p in &config.settings.presets {
            if p.description.is_empty() {
                println!("  {}", p.name);
            } else {
                println!("  {} - {}", p.name, p.description);
            }
        }
    }

    cue.validate()?;
    println!("\nConfiguration OK.");
    Ok(())
}

async fn show_status(socket_path: &Path, json: bool) -> Result<()> {
    let status = match ipc::request(socket_path, &Request::GetStatus).await? {
        Response::Status(status) => status,
        Response::Error { message, .. } => bail!("{}", message),
        other => bail!("unexpected response: {:?}", other),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let on_off = |enabled: bool| if enabled { "on" } else { "off" };
    println!("rogerthat {} (up {}s)", status.version, status.uptime_secs);
    if status.listening {
        println!("Listening:     yes ({})", status.state);
    } else {
        println!("Listening:     no");
    }
    println!("Hotkey:        {}", status.hotkey);
    if let Some(preset) = &status.preset {
        println!("Preset:        {}", preset);
    }
    println!("Prefix cue:    {}", on_off(status.prefix_enabled));
    println!("Suffix cue:    {}", on_off(status.suffix_enabled));
    println!(
        "Output device: {}",
        status.output_device.as_deref().unwrap_or("system default")
    );
    Ok(())
}

/// Send a control request and print the daemon's answer
async fn send(socket_path: &Path, request: Request) -> Result<()> {
    match ipc::request(socket_path, &request).await? {
        Response::Ok { message } => {
            println!("{}", message);
            Ok(())
        }
        Response::Error { code, message } => bail!("{} ({})", message, code),
        other => bail!("unexpected response: {:?}", other),
    }
}

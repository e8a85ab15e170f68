//! amloop Audio Player (amloop-ap) - Main entry point
//!
//! Preloads the configured clips, plays one on a gapless loop through the
//! default (or named) audio device and takes commands on stdin:
//!
//! ```text
//! play ID | switch ID | stop | status | quit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use amloop_ap::audio::{ClipSource, DeviceOutput, SymphoniaLoader};
use amloop_ap::config::{self, Overrides};
use amloop_ap::playback::{spawn_engine, EngineHandle, LoopEngine};
use amloop_ap::LoopEvent;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for amloop-ap
#[derive(Parser, Debug)]
#[command(name = "amloop-ap")]
#[command(about = "Gapless ambient loop player")]
#[command(version)]
struct Args {
    /// Clip to preload, as ID=PATH (repeatable)
    #[arg(long = "clip", value_name = "ID=PATH", value_parser = parse_clip)]
    clips: Vec<ClipSource>,

    /// Clip to start once preloading has settled
    #[arg(long, value_name = "ID")]
    play: Option<String>,

    /// Loop crossfade length in seconds
    #[arg(long, value_name = "SECONDS")]
    crossfade: Option<f64>,

    /// Loop only the last N seconds of each clip after the first pass
    #[arg(long, value_name = "SECONDS")]
    loop_last: Option<f64>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn parse_clip(arg: &str) -> std::result::Result<ClipSource, String> {
    match arg.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => Ok(ClipSource::new(id, path)),
        _ => Err(format!("expected ID=PATH, got '{}'", arg)),
    }
}

/// One line of stdin
#[derive(Debug, PartialEq)]
enum UserCommand {
    Play(String),
    Switch(String),
    Stop,
    Status,
    Quit,
}

fn parse_command(line: &str) -> std::result::Result<Option<UserCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next().map(str::to_string);

    let command = match (verb, arg) {
        ("play", Some(id)) => UserCommand::Play(id),
        ("switch", Some(id)) => UserCommand::Switch(id),
        ("stop", None) => UserCommand::Stop,
        ("status", None) => UserCommand::Status,
        ("quit" | "exit", None) => UserCommand::Quit,
        ("play" | "switch", None) => return Err(format!("usage: {} ID", verb)),
        _ => return Err(format!("unknown command: {}", line.trim())),
    };
    Ok(Some(command))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for name in DeviceOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let overrides = Overrides {
        crossfade_seconds: args.crossfade,
        loop_last_seconds: args.loop_last,
        device: args.device.clone(),
    };
    let config =
        config::load(args.config.as_deref(), &overrides).context("Failed to load configuration")?;

    // Initialize tracing
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("amloop_ap={level},amloop_common={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting amloop-ap v{}", env!("CARGO_PKG_VERSION"));

    let mut output = DeviceOutput::open(config.device.as_deref()).context("Failed to open audio output")?;
    let graph = output.start().context("Failed to start audio output")?;

    let loader = Arc::new(SymphoniaLoader::new(graph.sample_rate()));
    let engine =
        LoopEngine::new(config.engine.clone(), graph).context("Failed to initialize loop engine")?;
    let mut events = engine.subscribe();
    let (handle, driver) = spawn_engine(engine, loader);

    // Command-line clips first so they win over same-id config entries
    let clips: Vec<ClipSource> = args.clips.iter().chain(&config.clips).cloned().collect();
    if !clips.is_empty() {
        handle.preload(clips).await?;
        wait_for_load(&mut events).await;
    }
    tokio::spawn(log_events(events));

    if let Some(clip_id) = args.play {
        handle.play(clip_id).await?;
    }

    tokio::select! {
        result = command_loop(&handle) => {
            if !result? {
                info!("stdin closed; press Ctrl+C to exit");
                shutdown_signal().await;
            }
        }
        _ = shutdown_signal() => {}
    }

    // Driver may already be gone
    let _ = handle.shutdown().await;
    driver.await.context("Engine driver panicked")?;
    output.stop()?;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_load(events: &mut broadcast::Receiver<LoopEvent>) {
    loop {
        match events.recv().await {
            Ok(LoopEvent::Loaded { loaded, failed }) => {
                info!("Preload finished: {} loaded, {} failed", loaded, failed);
                return;
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<LoopEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!("Event: {}", json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log lagged by {} events", n),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Read commands until `quit` (returns true) or end of input (false)
async fn command_loop(handle: &EngineHandle) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{}", message);
                continue;
            }
        };

        match command {
            UserCommand::Play(clip_id) => handle.play(clip_id).await?,
            UserCommand::Switch(clip_id) => handle.switch_to(clip_id).await?,
            UserCommand::Stop => handle.stop().await?,
            UserCommand::Status => {
                let status = handle.status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            UserCommand::Quit => return Ok(true),
        }
    }
    Ok(false)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clip_arg() {
        assert_eq!(parse_clip("rain=/tmp/rain.wav").unwrap(), ClipSource::new("rain", "/tmp/rain.wav"));
        assert!(parse_clip("rain").is_err());
        assert!(parse_clip("=x.wav").is_err());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("play rain"), Ok(Some(UserCommand::Play("rain".into()))));
        assert_eq!(parse_command("  switch wind "), Ok(Some(UserCommand::Switch("wind".into()))));
        assert_eq!(parse_command("stop"), Ok(Some(UserCommand::Stop)));
        assert_eq!(parse_command(""), Ok(None));
        assert!(parse_command("play").is_err());
        assert!(parse_command("rewind").is_err());
    }
}

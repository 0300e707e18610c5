//! readaloud terminal host.
//!
//! Loads one buffer of synthesized speech, opens the default (or preferred)
//! output device and reads transport commands from stdin:
//!
//! ```text
//! readaloud <audio-file> [--rate HZ] [--settings PATH] [--export-wav PATH] [--device NAME]
//! ```

mod commands;
mod input;
mod settings;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use commands::{dispatch, CommandOutcome, TransportCommand, HELP};
use readaloud_core::{
    buffering::{wav::write_wav, TTS_SAMPLE_RATE},
    spawn_progress_ticker, CpalOutput, OutputDevice, PlaybackEngine, TransitionCause,
};
use settings::{default_settings_path, load_settings};
use state::AppState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug, PartialEq)]
#[command(name = "readaloud")]
#[command(about = "Play synthesized speech with pause, seek and speed control")]
#[command(version)]
struct CliArgs {
    /// Audio file: .wav, .b64/.txt (base64 PCM16) or raw PCM16
    input: PathBuf,

    /// Sample rate of PCM input in Hz (WAV files carry their own)
    #[arg(long = "rate", value_name = "HZ", value_parser = clap::value_parser!(u32).range(1..))]
    sample_rate: Option<u32>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long = "settings", value_name = "PATH")]
    settings_path: Option<PathBuf>,

    /// Write the decoded buffer as 16-bit WAV and exit
    #[arg(long, value_name = "PATH")]
    export_wav: Option<PathBuf>,

    /// Preferred output device name
    #[arg(long, env = "READALOUD_DEVICE")]
    device: Option<String>,
}

/// Apply a command result to the host: counters, speed persistence, replies.
/// Returns `true` when the host should exit.
fn report<D: OutputDevice>(
    state: &AppState<D>,
    cmd: TransportCommand,
    result: anyhow::Result<CommandOutcome>,
) -> bool {
    match result {
        Ok(CommandOutcome::Quit) => true,
        Ok(CommandOutcome::Continue(reply)) => {
            state.record_command(true);
            if matches!(cmd, TransportCommand::Speed(_)) {
                state.remember_speed();
            }
            if let Some(reply) = reply {
                println!("{reply}");
            }
            false
        }
        Err(e) => {
            state.record_command(false);
            eprintln!("{e:#}");
            false
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("readaloud=info,readaloud_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let settings_path = args.settings_path.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    if let Some(device) = args.device.clone() {
        app_settings.preferred_output_device = Some(device);
        app_settings.normalize();
    }
    info!(
        settings_path = ?settings_path,
        default_speed = app_settings.default_speed,
        progress_interval_ms = app_settings.progress_interval_ms,
        preferred_output_device = ?app_settings.preferred_output_device,
        "settings loaded"
    );

    // ── Input ─────────────────────────────────────────────────────────────
    let sample_rate = args.sample_rate.unwrap_or(TTS_SAMPLE_RATE);
    let buffer = input::load_input(&args.input, sample_rate)?;
    info!(
        input = %args.input.display(),
        sample_rate = buffer.sample_rate(),
        duration_secs = buffer.duration_secs(),
        "input decoded"
    );

    if let Some(out) = args.export_wav.as_ref() {
        write_wav(out, &buffer).with_context(|| format!("writing {}", out.display()))?;
        println!("wrote {} ({:.2}s)", out.display(), buffer.duration_secs());
        return Ok(());
    }

    // ── Engine setup ──────────────────────────────────────────────────────
    let device = CpalOutput::new(app_settings.preferred_output_device.clone());
    let engine = Arc::new(PlaybackEngine::new(app_settings.engine_config(), device));
    engine.load(buffer)?;

    let log_progress = app_settings.log_progress;
    let autoplay = app_settings.autoplay;
    let state = Arc::new(AppState::new(Arc::clone(&engine), app_settings, settings_path));
    let ticker = spawn_progress_ticker(Arc::clone(&engine), engine.config().progress_interval);

    // ── Event forwarding ──────────────────────────────────────────────────
    {
        let mut status_rx = engine.subscribe_status();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                match status_rx.recv().await {
                    Ok(ev) => {
                        state.record_transition(ev.cause);
                        if ev.cause == TransitionCause::Completed {
                            println!("finished");
                        } else {
                            println!("{:?} ({:?}) at {:.2}s", ev.status, ev.cause, ev.offset_secs);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("status forwarder lagged by {n} events"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
    if log_progress {
        let mut progress_rx = engine.subscribe_progress();
        tokio::spawn(async move {
            loop {
                match progress_rx.recv().await {
                    Ok(ev) => println!("{:>5.1}%  {:.2}s", ev.progress * 100.0, ev.position_secs),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    if autoplay {
        if let Err(e) = engine.play().await {
            warn!("autoplay failed: {e}");
            eprintln!("could not start playback: {e}");
        }
    }
    println!("{HELP}");

    // ── Command loop ──────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match line.parse::<TransportCommand>() {
            Ok(cmd) => cmd,
            Err(e) => {
                state.record_command(false);
                eprintln!("{e}");
                continue;
            }
        };

        if cmd.awaits_device() {
            let engine = Arc::clone(&engine);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let result = dispatch(&engine, cmd).await;
                report(&state, cmd, result);
            });
            continue;
        }
        if report(&state, cmd, dispatch(&engine, cmd).await) {
            break;
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    ticker.shutdown().await;
    engine.reset();
    let diag = state.diagnostics_snapshot();
    info!(
        commands_run = diag.commands_run,
        command_errors = diag.command_errors,
        completions = diag.completions,
        "readaloud exiting"
    );
    Ok(())
}

//! Transport command handlers.
//!
//! One command per stdin line. Parsing is separate from execution so both
//! can be tested without a terminal or a sound card.

use std::str::FromStr;

use anyhow::{bail, Context};
use readaloud_core::{audio::device::list_output_devices, OutputDevice, PlaybackEngine};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    /// Play when paused or stopped, pause when playing.
    Toggle,
    Reset,
    Speed(f64),
    Seek(f64),
    Status,
    Devices,
    Help,
    Quit,
}

impl TransportCommand {
    /// Commands that can park on a device resume. The host runs these off
    /// the stdin loop so `reset` and `quit` stay reachable.
    pub fn awaits_device(self) -> bool {
        matches!(self, Self::Play | Self::Toggle)
    }
}

impl FromStr for TransportCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            bail!("empty command");
        };
        let arg = parts.next();
        if parts.next().is_some() {
            bail!("too many arguments for `{verb}`");
        }

        let cmd = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("play" | "p", None) => Self::Play,
            ("pause", None) => Self::Pause,
            ("toggle" | "t", None) => Self::Toggle,
            ("reset" | "stop" | "r", None) => Self::Reset,
            ("speed" | "s", Some(v)) => Self::Speed(parse_number(v, "speed")?),
            ("seek", Some(v)) => Self::Seek(parse_number(v, "offset")?),
            ("status" | "?", None) => Self::Status,
            ("devices", None) => Self::Devices,
            ("help" | "h", None) => Self::Help,
            ("quit" | "exit" | "q", None) => Self::Quit,
            ("speed" | "s" | "seek", None) => bail!("`{verb}` needs a value"),
            (_, Some(_)) => bail!("`{verb}` takes no argument"),
            _ => bail!("unknown command `{verb}` (try `help`)"),
        };
        Ok(cmd)
    }
}

fn parse_number(raw: &str, what: &str) -> anyhow::Result<f64> {
    let trimmed = raw.trim_end_matches('x');
    trimmed
        .parse::<f64>()
        .with_context(|| format!("invalid {what} `{raw}`"))
}

pub const HELP: &str = "\
commands:
  play | pause | toggle | reset
  speed <multiplier>   e.g. speed 1.5
  seek <seconds>
  status | devices | help | quit";

/// What the host loop does after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Continue(Option<String>),
    Quit,
}

/// Run one command against the engine.
///
/// # Errors
/// Engine errors are returned as-is, wrapped in `anyhow`.
pub async fn dispatch<D: OutputDevice>(
    engine: &PlaybackEngine<D>,
    cmd: TransportCommand,
) -> anyhow::Result<CommandOutcome> {
    let reply = match cmd {
        TransportCommand::Play => {
            engine.play().await?;
            None
        }
        TransportCommand::Pause => {
            engine.pause();
            None
        }
        TransportCommand::Toggle => {
            if engine.is_playing() {
                engine.pause();
            } else {
                engine.play().await?;
            }
            None
        }
        TransportCommand::Reset => {
            engine.reset();
            None
        }
        TransportCommand::Speed(v) => {
            engine.set_speed(v).with_context(|| {
                format!("supported speeds: {:?}", engine.config().supported_speeds)
            })?;
            None
        }
        TransportCommand::Seek(offset) => {
            engine.seek(offset)?;
            None
        }
        TransportCommand::Status => Some(serde_json::to_string(&engine.snapshot())?),
        TransportCommand::Devices => {
            let devices = list_output_devices();
            if devices.is_empty() {
                Some("no output devices found".to_string())
            } else {
                Some(
                    devices
                        .iter()
                        .map(|d| {
                            let mut line = d.name.clone();
                            if d.is_default {
                                line.push_str(" [default]");
                            }
                            if d.is_recommended {
                                line.push_str(" [recommended]");
                            }
                            line
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }
        }
        TransportCommand::Help => Some(HELP.to_string()),
        TransportCommand::Quit => {
            info!("quit requested");
            return Ok(CommandOutcome::Quit);
        }
    };
    Ok(CommandOutcome::Continue(reply))
}

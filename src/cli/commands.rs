//! CLI command implementations

use anyhow::{Context, Result};
use std::fmt::Write as _;

use crate::cli::args::{ConfigCommand, DaemonCommand, SettingKey};
use crate::config::Settings;
use crate::daemon::clock::{ClockSource, SystemClock};
use crate::daemon::command::{Command, Format, TimestampSpec};
use crate::daemon::emulator::Emulator;
use crate::daemon::session::ControlSession;
use crate::daemon::status::StatusSnapshot;

const NOT_RUNNING_HINT: &str = "Is the recorder running? Try: camctl daemon start";

/// Run one session and print the status if it was asked for
async fn run_commands(settings: &Settings, commands: &[Command], want_status: bool) -> Result<()> {
    let mut session = ControlSession::from_settings(settings);
    let snapshot = session
        .execute(commands, want_status, settings.status_timeout())
        .await
        .context(NOT_RUNNING_HINT)?;

    if let Some(snapshot) = snapshot {
        print!("{}", format_snapshot(&snapshot));
    }
    Ok(())
}

/// Start recording
pub async fn start_recording(settings: &Settings, status: bool) -> Result<()> {
    run_commands(settings, &[Command::Start], status).await?;
    if !status {
        println!("Recording started");
    }
    Ok(())
}

/// Stop recording
pub async fn stop_recording(settings: &Settings, status: bool) -> Result<()> {
    run_commands(settings, &[Command::Stop], status).await?;
    if !status {
        println!("Recording stopped");
    }
    Ok(())
}

/// Stop recording and terminate the recorder
pub async fn exit_recorder(settings: &Settings) -> Result<()> {
    run_commands(settings, &[Command::Exit], false).await?;
    println!("Recorder exiting");
    Ok(())
}

/// Show the recorder status
pub async fn show_status(settings: &Settings, json: bool, raw: bool) -> Result<()> {
    let mut session = ControlSession::from_settings(settings);

    if raw {
        let document = session
            .execute_raw(&[], settings.status_timeout())
            .await
            .with_context(|| format!("Failed to get status. {}", NOT_RUNNING_HINT))?;
        print!("{}", document);
        return Ok(());
    }

    let snapshot = session
        .execute(&[], true, settings.status_timeout())
        .await
        .with_context(|| format!("Failed to get status. {}", NOT_RUNNING_HINT))?
        .context("Recorder sent no status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", format_snapshot(&snapshot));
    }
    Ok(())
}

/// Change one recorder setting
pub async fn set_value(
    settings: &Settings,
    key: SettingKey,
    value: &str,
    status: bool,
) -> Result<()> {
    let command = build_setting(key, value, &SystemClock)?;
    run_commands(settings, std::slice::from_ref(&command), status).await?;
    if !status {
        println!("{} set", command.name());
    }
    Ok(())
}

/// Send arbitrary clause text
pub async fn send_text(settings: &Settings, text: &str) -> Result<()> {
    run_commands(settings, &[Command::Raw(text.to_string())], false).await?;
    println!("Sent: {}", text);
    Ok(())
}

/// Handle daemon subcommands
pub async fn daemon_command(settings: &Settings, cmd: DaemonCommand) -> Result<()> {
    match cmd {
        DaemonCommand::Start => {
            crate::daemon::start_daemon(settings).await?;
            println!("Recorder started");
        }
        DaemonCommand::Stop => {
            crate::daemon::stop_daemon(settings).await?;
            println!("Recorder stopped");
        }
        DaemonCommand::Status => {
            if crate::daemon::is_running(settings) {
                println!("Recorder is running");
            } else {
                println!("Recorder is not running");
            }
        }
    }

    Ok(())
}

/// Run the stand-in recorder until it is told to exit or interrupted
pub async fn run_emulator(settings: &Settings) -> Result<()> {
    let mut emulator = Emulator::new(settings.pipes.command_pipe.clone())
        .with_pipe_mode(settings.pipes.mode)
        .with_write_timeout(settings.send_timeout())
        .with_poll_interval(settings.poll_interval());

    println!(
        "Emulating recorder on {}",
        settings.pipes.command_pipe.display()
    );

    tokio::select! {
        result = emulator.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    Ok(())
}

/// Handle config subcommands
pub fn config_command(settings: &Settings, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(settings)?;
            println!("{}", toml);
        }
        ConfigCommand::Path => {
            let path = Settings::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = Settings::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Settings::write_default(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

/// Turn a `set` key and its textual value into a command.
pub fn build_setting(key: SettingKey, value: &str, clock: &dyn ClockSource) -> Result<Command> {
    let value = value.trim();
    let command = match key {
        SettingKey::Prefix => Command::SetPrefix(value.to_string()),
        SettingKey::Format => Command::SetFormat(value.parse::<Format>()?),
        SettingKey::Debuglev => Command::SetDebugLevel(parse_number(value, "debuglev")?),
        SettingKey::Duration => Command::SetDuration(parse_number(value, "duration")?),
        SettingKey::Length => Command::SetMaxSize(parse_number(value, "length")?),
        SettingKey::MaxFrames => Command::SetMaxFrames(parse_number(value, "max-frames")?),
        SettingKey::FramesPerChunk => {
            Command::SetFramesPerChunk(parse_number(value, "frames-per-chunk")?)
        }
        SettingKey::Frameskip => Command::SetFrameskip(parse_number(value, "frameskip")?),
        SettingKey::Timelapse => Command::SetTimelapse(parse_number(value, "timelapse")?),
        SettingKey::Timescale => Command::SetTimescale(parse_number(value, "timescale")?),
        SettingKey::Exif => Command::SetExif(parse_flag(value)?),
        SettingKey::RawdevPath => match value {
            "" | "none" => Command::SetRawdevPath(None),
            path => Command::SetRawdevPath(Some(path.to_string())),
        },
        SettingKey::StartAfter => {
            let spec: TimestampSpec = value.parse()?;
            Command::SetStartAfterTimestamp(spec.resolve(clock))
        }
        SettingKey::Kml => Command::SetKml(parse_flag(value)?),
        SettingKey::KmlPeriod => Command::SetKmlPeriod(parse_number(value, "kml-period")?),
        SettingKey::Greedy => Command::SetGreedy(parse_flag(value)?),
        SettingKey::IgnoreFps => Command::SetIgnoreFps(parse_flag(value)?),
    };
    command.validate()?;
    Ok(command)
}

/// Human-readable status summary
pub fn format_snapshot(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Status: {}", snapshot.state);
    if !snapshot.file_name.is_empty() {
        let _ = writeln!(out, "  File: {}", snapshot.file_name);
    }
    if let Some(device) = &snapshot.raw_device_path {
        let _ = writeln!(out, "  Raw device: {}", device);
    }
    let _ = writeln!(
        out,
        "  Duration: {}",
        format_duration(snapshot.file_duration as u64)
    );
    let _ = writeln!(out, "  Frames: {}", snapshot.frame_number);
    let _ = writeln!(out, "  Length: {}", format_bytes(snapshot.file_length));
    if let Some(format) = snapshot.format() {
        let _ = writeln!(out, "  Format: {}", format);
    }
    if let Some(prefix) = snapshot.prefix().filter(|p| !p.is_empty()) {
        let _ = writeln!(out, "  Prefix: {}", prefix);
    }
    if snapshot.overruns > 0 {
        let _ = writeln!(out, "  Overruns: {}", snapshot.overruns);
    }

    for channel in &snapshot.channels {
        let active = match channel.active {
            Some(false) => " (disabled)",
            _ => "",
        };
        let _ = writeln!(
            out,
            "  Port {}{}: compressor {}, buffer {} used / {} free",
            channel.index,
            active,
            channel.compressor_state,
            format_bytes(channel.buffer_used),
            format_bytes(channel.buffer_free)
        );
    }
    out
}

// Helper functions

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: {:?}", what, value))
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "1" | "yes" | "on" | "true" => Ok(true),
        "0" | "no" | "off" | "false" => Ok(false),
        other => anyhow::bail!("Expected yes/no, got {:?}", other),
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

//! Daemon module for camctl
//!
//! Command encoding, pipe transport, status decoding and the request/response
//! session on top of them, plus launching and probing the recorder process.

pub mod clock;
pub mod command;
pub mod emulator;
pub mod session;
pub mod status;
pub mod transport;

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command as Process, Stdio};
use std::time::{Duration, Instant};

use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::daemon::command::{parse_line, Command};
use crate::daemon::session::ControlSession;
use crate::daemon::transport::PipePair;
use crate::{CamctlError, Result};

/// Check the process table for a recorder serving our command pipe.
pub fn is_running(settings: &Settings) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let binary = binary_name(&settings.daemon.binary);
    let command_pipe = settings.pipes.command_pipe.as_os_str();

    let running = sys.processes().values().any(|p| {
        p.name() == binary.as_os_str() && serves_pipe(p.cmd(), command_pipe)
    });
    debug!("Recorder {:?} running: {}", binary, running);
    running
}

fn binary_name(binary: &Path) -> std::ffi::OsString {
    binary
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| binary.as_os_str().to_os_string())
}

/// Whether a command line passes `-n <command_pipe>`
fn serves_pipe<S: AsRef<OsStr>>(args: &[S], command_pipe: &OsStr) -> bool {
    args.windows(2)
        .any(|w| w[0].as_ref() == "-n" && w[1].as_ref() == command_pipe)
}

/// Initial commands from the settings, as clauses
fn initial_commands(settings: &Settings) -> Vec<Command> {
    settings
        .daemon
        .initial_commands
        .iter()
        .flat_map(|line| parse_line(line))
        .map(|clause| Command::Param {
            name: clause.name,
            value: clause.value,
        })
        .collect()
}

/// Launch the recorder unless it is already running, then apply the initial
/// commands.
pub async fn start_daemon(settings: &Settings) -> Result<()> {
    if is_running(settings) {
        return Err(CamctlError::Daemon("Recorder is already running".to_string()));
    }

    let pipes = PipePair::new(
        settings.pipes.command_pipe.clone(),
        settings.pipes.status_pipe.clone(),
    );

    // Leftovers from a previous instance would make us talk to nobody.
    transport::remove_fifo(&pipes.command)?;
    transport::remove_fifo(&pipes.status)?;

    let mut child = Process::new(&settings.daemon.binary)
        .arg("-n")
        .arg(&pipes.command)
        .arg("-p")
        .arg(settings.daemon.port.to_string())
        .arg("-s")
        .arg(&settings.daemon.state_file)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            CamctlError::Daemon(format!(
                "Failed to launch {}: {}",
                settings.daemon.binary.display(),
                e
            ))
        })?;
    info!("Launched recorder (PID {})", child.id());

    let deadline = Instant::now() + settings.startup_wait();
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(CamctlError::Daemon(format!(
                "Recorder exited during startup ({})",
                status
            )));
        }
        if pipes.command.exists() {
            break;
        }
        if Instant::now() >= deadline {
            return Err(CamctlError::Daemon(format!(
                "Recorder did not create {} in time",
                pipes.command.display()
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if !settings.pipes.unique_status_pipes {
        pipes.ensure(settings.pipes.mode)?;
    }

    let commands = initial_commands(settings);
    if !commands.is_empty() {
        let mut session = ControlSession::from_settings(settings);
        session
            .execute(&commands, false, settings.status_timeout())
            .await?;
    }

    Ok(())
}

/// Ask the recorder to exit.
pub async fn stop_daemon(settings: &Settings) -> Result<()> {
    let mut session = ControlSession::from_settings(settings);
    session
        .execute(&[Command::Exit], false, settings.status_timeout())
        .await?;

    let deadline = Instant::now() + settings.startup_wait();
    while is_running(settings) {
        if Instant::now() >= deadline {
            warn!("Recorder still in the process table after exit");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_recorder_command_line() {
        let args = ["camogm", "-n", "/var/state/camogm_cmd", "-p", "3456"];
        assert!(serves_pipe(&args, OsStr::new("/var/state/camogm_cmd")));
        assert!(!serves_pipe(&args, OsStr::new("/tmp/other_cmd")));
        assert!(!serves_pipe(&["camogm"], OsStr::new("/var/state/camogm_cmd")));
    }

    #[test]
    fn binary_name_strips_directories() {
        assert_eq!(binary_name(Path::new("/usr/bin/camogm")), "camogm");
        assert_eq!(binary_name(Path::new("camogm")), "camogm");
    }

    #[test]
    fn default_initial_commands_select_mov() {
        let commands = initial_commands(&Settings::default());
        let line = command::encode(&commands).unwrap();
        assert_eq!(line, "format=mov;save_gp=1;\n");
    }
}

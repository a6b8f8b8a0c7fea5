//! Request/response cycles against the recorder
//!
//! A cycle sends one batch of commands and, when status is wanted, appends an
//! `xstatus` request naming a status pipe as the last clause so the reply
//! reflects every command before it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::Settings;
use crate::daemon::command::{encode, Command, CommandError};
use crate::daemon::status::{decode, DecodeError, StatusSnapshot};
use crate::daemon::transport::{self, PipePair, TransportError};

/// Errors surfaced by a control session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),

    #[error("failed to send commands: {0}")]
    SendFailed(#[source] TransportError),

    #[error("failed to receive status: {0}")]
    ReceiveFailed(#[source] TransportError),

    #[error("failed to decode status: {0}")]
    DecodeFailed(#[from] DecodeError),
}

/// Where a session is in its current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Done,
}

/// How a session reaches the daemon
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub pipes: PipePair,
    /// Use a fresh status pipe per cycle instead of the shared path
    pub unique_status_pipes: bool,
    pub pipe_mode: u32,
    pub send_timeout: Duration,
    pub poll_interval: Duration,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pipes: PipePair::new(
                settings.pipes.command_pipe.clone(),
                settings.pipes.status_pipe.clone(),
            ),
            unique_status_pipes: settings.pipes.unique_status_pipes,
            pipe_mode: settings.pipes.mode,
            send_timeout: settings.send_timeout(),
            poll_interval: settings.poll_interval(),
        }
    }
}

/// Client side of the command/status channel
pub struct ControlSession {
    config: SessionConfig,
    state: SessionState,
}

impl ControlSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(SessionConfig::from_settings(settings))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Send `commands` and, if `want_status`, return the status that follows them.
    ///
    /// Without status this is fire-and-forget: the session passes through
    /// `AwaitingResponse` once the line is written and returns `None` right
    /// away, since no reply is expected.
    pub async fn execute(
        &mut self,
        commands: &[Command],
        want_status: bool,
        timeout: Duration,
    ) -> Result<Option<StatusSnapshot>, SessionError> {
        if !want_status {
            self.begin();
            let sent = match encode(commands) {
                Ok(line) => self.send_line(&line).await,
                Err(e) => Err(e.into()),
            };
            self.finish();
            return sent.map(|()| None);
        }

        let document = self.execute_raw(commands, timeout).await?;
        Ok(Some(decode(&document)?))
    }

    /// Like [`execute`](Self::execute) with status, but hand back the
    /// undecoded document.
    pub async fn execute_raw(
        &mut self,
        commands: &[Command],
        timeout: Duration,
    ) -> Result<String, SessionError> {
        self.begin();
        let status_pipe = self.status_pipe_path();

        let result = self.cycle(commands, &status_pipe, timeout).await;

        if self.config.unique_status_pipes {
            if let Err(e) = transport::remove_fifo(&status_pipe) {
                debug!("Could not remove status pipe {:?}: {}", status_pipe, e);
            }
        }
        self.finish();
        result
    }

    async fn cycle(
        &mut self,
        commands: &[Command],
        status_pipe: &Path,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        let mut batch = commands.to_vec();
        batch.push(Command::RequestStatus(status_pipe.to_path_buf()));
        let line = encode(&batch)?;

        // Never trust a pipe left over from an aborted cycle.
        transport::recreate_fifo(status_pipe, self.config.pipe_mode)
            .map_err(SessionError::SendFailed)?;

        self.send_line(&line).await?;

        transport::receive(status_pipe, timeout, self.config.poll_interval)
            .await
            .map_err(SessionError::ReceiveFailed)
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        debug!("Sending command line {:?}", line.trim_end());
        transport::send(
            &self.config.pipes.command,
            line,
            self.config.send_timeout,
            self.config.poll_interval,
        )
        .await
        .map_err(SessionError::SendFailed)?;
        self.state = SessionState::AwaitingResponse;
        Ok(())
    }

    fn status_pipe_path(&self) -> PathBuf {
        let base = &self.config.pipes.status;
        if !self.config.unique_status_pipes {
            return base.clone();
        }
        let mut name = base.as_os_str().to_owned();
        name.push(format!(".{}", Uuid::new_v4().simple()));
        PathBuf::from(name)
    }

    fn begin(&mut self) {
        self.state = SessionState::Idle;
    }

    fn finish(&mut self) {
        self.state = SessionState::Done;
    }
}

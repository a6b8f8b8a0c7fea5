//! camctl - Control client for the camogm camera recorder daemon
//!
//! Talks to the recorder over two named pipes: a command pipe the daemon reads
//! line-oriented commands from, and a status pipe it writes XML status into.

pub mod cli;
pub mod config;
pub mod daemon;

use thiserror::Error;

use crate::daemon::session::SessionError;
use crate::daemon::transport::TransportError;

/// Main error type for camctl
#[derive(Error, Debug)]
pub enum CamctlError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CamctlError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "camctl";

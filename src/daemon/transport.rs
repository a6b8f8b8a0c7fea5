//! Named pipe transport between the control client and the recorder
//!
//! The command pipe is owned by the daemon: it is created when the daemon
//! starts and we only ever write to it. The status pipe is ours: we create it,
//! name it in an `xstatus` command, and read whatever the daemon writes there
//! until it closes its end.

use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::stat::{umask, Mode};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Errors on the pipe transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no daemon is listening on {path}")]
    Unavailable { path: PathBuf },

    #[error("timed out after {timeout:?} on {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("pipe I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Command and status pipe locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipePair {
    pub command: PathBuf,
    pub status: PathBuf,
}

impl PipePair {
    pub fn new(command: impl Into<PathBuf>, status: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            status: status.into(),
        }
    }

    /// Make sure the status pipe exists. The command pipe is the daemon's.
    pub fn ensure(&self, mode: u32) -> Result<(), TransportError> {
        ensure_fifo(&self.status, mode)
    }
}

/// Create a FIFO at `path` with exactly `mode`, unless one is already there.
pub fn ensure_fifo(path: &Path, mode: u32) -> Result<(), TransportError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            return Err(TransportError::io(
                path,
                std::io::Error::new(ErrorKind::InvalidInput, "exists and is not a FIFO"),
            ));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(TransportError::io(path, e)),
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| TransportError::io(path, e))?;
        }
    }

    let mode = Mode::from_bits_truncate(mode as libc::mode_t);
    let previous = umask(Mode::empty());
    let created = nix::unistd::mkfifo(path, mode);
    umask(previous);

    match created {
        Ok(()) => {
            debug!("Created FIFO {:?} (mode {:o})", path, mode.bits());
            Ok(())
        }
        // Lost a race with another client creating the same pipe.
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(errno) => Err(TransportError::io(path, errno.into())),
    }
}

/// Replace whatever is at `path` with a fresh, empty FIFO.
pub fn recreate_fifo(path: &Path, mode: u32) -> Result<(), TransportError> {
    if path.exists() {
        debug!("Replacing {:?}", path);
        remove_fifo(path)?;
    }
    ensure_fifo(path, mode)
}

/// Remove a FIFO, ignoring one that is already gone.
pub fn remove_fifo(path: &Path) -> Result<(), TransportError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransportError::io(path, e)),
    }
}

/// Write `text` to the command pipe in one go.
///
/// Opening is non-blocking: while the pipe has no reader the open is retried
/// every `poll` until `open_timeout` passes, then the daemon is reported as
/// unavailable. A missing pipe means the daemon is not running at all.
pub async fn send(
    path: &Path,
    text: &str,
    open_timeout: Duration,
    poll: Duration,
) -> Result<(), TransportError> {
    let deadline = Instant::now() + open_timeout;

    let mut sender = loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => break sender,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransportError::Unavailable {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                if Instant::now() >= deadline {
                    return Err(TransportError::Unavailable {
                        path: path.to_path_buf(),
                    });
                }
                sleep(poll).await;
            }
            Err(e) => return Err(TransportError::io(path, e)),
        }
    };

    debug!("Writing {:?} to {:?}", text, path);

    let remaining = deadline.saturating_duration_since(Instant::now()).max(poll);
    let write = async {
        sender.write_all(text.as_bytes()).await?;
        sender.flush().await
    };
    match timeout(remaining, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Unavailable {
            path: path.to_path_buf(),
        }),
        Ok(Err(e)) => Err(TransportError::io(path, e)),
        Err(_) => Err(TransportError::Timeout {
            path: path.to_path_buf(),
            timeout: open_timeout,
        }),
    }
}

/// Read one complete response from the status pipe.
///
/// Returns only after the daemon has written and closed its end; anything
/// short of that within `limit` is a timeout, never a partial result.
pub async fn receive(
    path: &Path,
    limit: Duration,
    poll: Duration,
) -> Result<String, TransportError> {
    let read = async {
        let mut receiver = pipe::OpenOptions::new()
            .open_receiver(path)
            .map_err(|e| TransportError::io(path, e))?;

        let mut buf = Vec::new();
        loop {
            let n = receiver
                .read_buf(&mut buf)
                .await
                .map_err(|e| TransportError::io(path, e))?;
            if n > 0 {
                continue;
            }
            if !buf.is_empty() {
                break;
            }
            // End-of-file before the daemon ever connected: keep waiting.
            sleep(poll).await;
        }

        debug!("Read {} bytes from {:?}", buf.len(), path);
        String::from_utf8(buf)
            .map_err(|e| TransportError::io(path, std::io::Error::new(ErrorKind::InvalidData, e)))
    };

    match timeout(limit, read).await {
        Ok(result) => result,
        Err(_) => {
            warn!("No status from daemon on {:?} within {:?}", path, limit);
            Err(TransportError::Timeout {
                path: path.to_path_buf(),
                timeout: limit,
            })
        }
    }
}

//! Command line protocol for the recorder's command pipe
//!
//! Every command renders as one `;`-terminated clause, either `name;` or
//! `name=value;`. A batch is written as a single newline-terminated line.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while building a command line
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("value for `{name}` contains a clause separator: {value:?}")]
    InvalidValue { name: String, value: String },

    #[error("invalid command name: {0:?}")]
    InvalidName(String),

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("unknown output format: {0:?}")]
    UnknownFormat(String),
}

/// Container format the recorder writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    None,
    Ogm,
    Jpeg,
    Mov,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ogm => "ogm",
            Self::Jpeg => "jpeg",
            Self::Mov => "mov",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "ogm" | "ogg" => Ok(Self::Ogm),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "mov" => Ok(Self::Mov),
            other => Err(CommandError::UnknownFormat(other.to_string())),
        }
    }
}

/// A single recorder command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start recording
    Start,
    /// Stop recording
    Stop,
    /// Stop recording and terminate the daemon
    Exit,
    /// Reset the read pointer to the last acquired frame
    Reset,
    /// Cancel a running raw-device read
    ReaderStop,
    /// Directory (or file name prefix) for new files
    SetPrefix(String),
    SetFormat(Format),
    SetDebugLevel(u32),
    /// Where the daemon writes its debug output
    SetDebugOutput(String),
    /// Ask for an XML status document written to the given path
    RequestStatus(PathBuf),
    /// Ask for a plain-text status report written to the given path
    RequestTextStatus(PathBuf),
    /// Raw block device for fast recording; `None` leaves fast-recording mode
    SetRawdevPath(Option<String>),
    /// Maximal segment duration, seconds
    SetDuration(u32),
    /// Maximal segment length, bytes
    SetMaxSize(u64),
    SetMaxFrames(u32),
    SetFramesPerChunk(u32),
    /// Store every N-th frame
    SetFrameskip(u32),
    /// Store one frame per N seconds
    SetTimelapse(u32),
    SetTimescale(f64),
    SetExif(bool),
    SetSaveGlobalPointer(bool),
    /// Absolute daemon clock time; resolve relative values with [`TimestampSpec`]
    SetStartAfterTimestamp(f64),
    SetKml(bool),
    SetKmlPeriod(u32),
    SetGreedy(bool),
    SetIgnoreFps(bool),
    EnablePort(u8),
    DisablePort(u8),
    /// Any other named parameter (`audio`, `kml_hhf`, `allow_sync`, ...)
    Param { name: String, value: Option<String> },
    /// Arbitrary clause text sent as-is
    Raw(String),
}

impl Command {
    /// Protocol name of this command
    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Exit => "exit",
            Self::Reset => "reset",
            Self::ReaderStop => "reader_stop",
            Self::SetPrefix(_) => "prefix",
            Self::SetFormat(_) => "format",
            Self::SetDebugLevel(_) => "debuglev",
            Self::SetDebugOutput(_) => "debug",
            Self::RequestStatus(_) => "xstatus",
            Self::RequestTextStatus(_) => "status",
            Self::SetRawdevPath(_) => "rawdev_path",
            Self::SetDuration(_) => "duration",
            Self::SetMaxSize(_) => "length",
            Self::SetMaxFrames(_) => "max_frames",
            Self::SetFramesPerChunk(_) => "frames_per_chunk",
            Self::SetFrameskip(_) => "frameskip",
            Self::SetTimelapse(_) => "timelapse",
            Self::SetTimescale(_) => "timescale",
            Self::SetExif(_) => "exif",
            Self::SetSaveGlobalPointer(_) => "save_gp",
            Self::SetStartAfterTimestamp(_) => "start_after_timestamp",
            Self::SetKml(_) => "kml",
            Self::SetKmlPeriod(_) => "kml_period",
            Self::SetGreedy(_) => "greedy",
            Self::SetIgnoreFps(_) => "ignore_fps",
            Self::EnablePort(_) => "port_enable",
            Self::DisablePort(_) => "port_disable",
            Self::Param { name, .. } => name,
            Self::Raw(text) => text,
        }
    }

    /// Rendered parameter value, if the command carries one
    pub fn value(&self) -> Option<String> {
        match self {
            Self::Start
            | Self::Stop
            | Self::Exit
            | Self::Reset
            | Self::ReaderStop
            | Self::Raw(_) => None,
            Self::SetPrefix(v) | Self::SetDebugOutput(v) => Some(v.clone()),
            Self::SetFormat(f) => Some(f.to_string()),
            Self::SetDebugLevel(v)
            | Self::SetDuration(v)
            | Self::SetMaxFrames(v)
            | Self::SetFramesPerChunk(v)
            | Self::SetFrameskip(v)
            | Self::SetTimelapse(v)
            | Self::SetKmlPeriod(v) => Some(v.to_string()),
            Self::RequestStatus(p) | Self::RequestTextStatus(p) => {
                Some(p.to_string_lossy().into_owned())
            }
            Self::SetRawdevPath(p) => p.clone(),
            Self::SetMaxSize(v) => Some(v.to_string()),
            Self::SetTimescale(v) | Self::SetStartAfterTimestamp(v) => Some(v.to_string()),
            Self::SetExif(b)
            | Self::SetSaveGlobalPointer(b)
            | Self::SetKml(b)
            | Self::SetGreedy(b)
            | Self::SetIgnoreFps(b) => Some(u8::from(*b).to_string()),
            Self::EnablePort(p) | Self::DisablePort(p) => Some(p.to_string()),
            Self::Param { value, .. } => value.clone(),
        }
    }

    /// Reject text that would split into more than one clause on the daemon side.
    pub fn validate(&self) -> Result<(), CommandError> {
        let name = self.name();
        if let Self::Raw(text) = self {
            if text.trim().is_empty() || contains_separator(text) {
                return Err(CommandError::InvalidValue {
                    name: "raw".to_string(),
                    value: text.clone(),
                });
            }
            return Ok(());
        }

        if name.is_empty() || name.contains(|c: char| matches!(c, '=' | ' ' | '\t')) {
            return Err(CommandError::InvalidName(name.to_string()));
        }
        if contains_separator(name) {
            return Err(CommandError::InvalidName(name.to_string()));
        }
        if let Some(value) = self.value() {
            if contains_separator(&value) {
                return Err(CommandError::InvalidValue {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    fn render(&self, out: &mut String) {
        out.push_str(self.name());
        if let Some(value) = self.value() {
            out.push('=');
            out.push_str(&value);
        }
        out.push(';');
    }
}

fn contains_separator(s: &str) -> bool {
    s.contains(|c: char| matches!(c, ';' | '\n' | '\r'))
}

/// Encode a batch of commands into one command-pipe line.
///
/// Order is preserved. Nothing is sent if any command fails validation.
pub fn encode(commands: &[Command]) -> Result<String, CommandError> {
    let mut line = String::new();
    for command in commands {
        command.validate()?;
        command.render(&mut line);
    }
    line.push('\n');
    Ok(line)
}

/// A start-after timestamp as given by a user: absolute, or `pN` for
/// "N seconds after the daemon's current time".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimestampSpec {
    Absolute(f64),
    Relative(u64),
}

impl TimestampSpec {
    /// Turn this into an absolute timestamp using the given clock.
    pub fn resolve(&self, clock: &dyn super::clock::ClockSource) -> f64 {
        match self {
            Self::Absolute(ts) => *ts,
            Self::Relative(secs) => clock.now() + *secs as f64,
        }
    }
}

impl FromStr for TimestampSpec {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('p') {
            return rest
                .parse::<u64>()
                .map(Self::Relative)
                .map_err(|_| CommandError::InvalidTimestamp(s.to_string()));
        }
        match s.parse::<f64>() {
            Ok(ts) if ts.is_finite() && ts >= 0.0 => Ok(Self::Absolute(ts)),
            _ => Err(CommandError::InvalidTimestamp(s.to_string())),
        }
    }
}

/// One clause as the daemon sees it after reading the pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub name: String,
    pub value: Option<String>,
}

/// Split command pipe text into clauses the way the recorder reads them.
///
/// Clauses end at `;` or newline and empty ones are skipped. The name runs up
/// to the first `=`, space or tab; the value has surrounding `=`, spaces and
/// tabs trimmed, and an empty value counts as none.
pub fn parse_line(text: &str) -> Vec<Clause> {
    text.split([';', '\n'])
        .filter_map(parse_clause)
        .collect()
}

/// Parse a single clause with its terminator already removed.
pub fn parse_clause(raw: &str) -> Option<Clause> {
    let is_sep = |c: char| matches!(c, '=' | ' ' | '\t');
    let raw = raw.trim_start_matches([' ', '\t']).trim_end_matches('\r');
    if raw.is_empty() {
        return None;
    }

    let (name, value) = match raw.find(is_sep) {
        Some(idx) => {
            let value = raw[idx..].trim_matches(is_sep);
            (&raw[..idx], (!value.is_empty()).then(|| value.to_string()))
        }
        None => (raw, None),
    };

    Some(Clause {
        name: name.to_string(),
        value,
    })
}

//! Decoding of the recorder's XML status document
//!
//! The daemon answers `xstatus` with a flat `<camogm_state>` document plus one
//! `<sensor_port_N>` block per channel. String values come wrapped in double
//! quotes; one layer of quoting is removed from every value.

use std::collections::BTreeMap;
use std::fmt;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors raised while decoding a status document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed status document: {0}")]
    Malformed(String),

    #[error("status document has no `{0}` field")]
    MissingField(String),
}

/// Recorder state as reported by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderState {
    Stopped,
    Running,
    Starting,
    Reading,
    Other(String),
}

impl RecorderState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Starting => "starting",
            Self::Reading => "reading",
            Self::Other(s) => s,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Running | Self::Starting)
    }
}

impl From<&str> for RecorderState {
    fn from(s: &str) -> Self {
        match s {
            "stopped" => Self::Stopped,
            "running" | "recording" => Self::Running,
            "starting" => Self::Starting,
            "reading" => Self::Reading,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RecorderState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Status of one sensor channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub index: u32,
    pub active: Option<bool>,
    pub compressor_state: String,
    pub buffer_free: i64,
    pub buffer_used: i64,
    pub frame_period: Option<i64>,
}

/// One complete status read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: RecorderState,
    pub file_name: String,
    /// Seconds
    pub file_duration: f64,
    pub frame_number: i64,
    /// Bytes
    pub file_length: i64,
    pub frame_width: Option<i64>,
    pub frame_height: Option<i64>,
    /// Set only in fast-recording mode
    pub raw_device_path: Option<String>,
    pub overruns: i64,
    /// Channels in ascending index order
    pub channels: Vec<ChannelStatus>,
    /// Every leaf in the document, unquoted. Channel fields are keyed as
    /// `sensor_port_N.field`.
    pub params: BTreeMap<String, String>,
}

impl StatusSnapshot {
    /// Look up any field by its document name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn format(&self) -> Option<&str> {
        self.param("format")
    }

    pub fn prefix(&self) -> Option<&str> {
        self.param("prefix")
    }
}

const CHANNEL_PREFIX: &str = "sensor_port_";

/// Decode a status document into a snapshot.
pub fn decode(xml: &str) -> Result<StatusSnapshot, DecodeError> {
    let leaves = collect_leaves(xml)?;

    let mut params = BTreeMap::new();
    let mut channels: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();

    for (path, raw) in leaves {
        let value = strip_quotes(raw.trim()).to_string();
        if let [block, field] = path.as_slice() {
            if let Some(index) = channel_index(block) {
                channels
                    .entry(index)
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
        }
        params.insert(path.join("."), value);
    }

    let state = required(&params, "state")?;
    let file_name = required(&params, "file_name")?.to_string();

    let channels = channels
        .into_iter()
        .map(|(index, fields)| decode_channel(index, &fields))
        .collect::<Result<Vec<_>, _>>()?;

    let overruns = match optional_int(&params, "raw_device_overruns")? {
        Some(n) => n,
        None => optional_int(&params, "buffer_overruns")?.unwrap_or(0),
    };

    Ok(StatusSnapshot {
        state: RecorderState::from(state),
        file_name,
        file_duration: optional_float(&params, "file_duration")?.unwrap_or(0.0),
        frame_number: optional_int(&params, "frame_number")?.unwrap_or(0),
        file_length: optional_int(&params, "file_length")?.unwrap_or(0),
        frame_width: optional_int(&params, "frame_width")?,
        frame_height: optional_int(&params, "frame_height")?,
        raw_device_path: params
            .get("raw_device_path")
            .filter(|p| !p.is_empty())
            .cloned(),
        overruns,
        channels,
        params,
    })
}

fn decode_channel(
    index: u32,
    fields: &BTreeMap<String, String>,
) -> Result<ChannelStatus, DecodeError> {
    Ok(ChannelStatus {
        index,
        active: fields.get("channel_active").map(|v| v == "yes"),
        compressor_state: fields.get("compressor_state").cloned().unwrap_or_default(),
        buffer_free: optional_int(fields, "buffer_free")?.unwrap_or(0),
        buffer_used: optional_int(fields, "buffer_used")?.unwrap_or(0),
        frame_period: optional_int(fields, "frame_period")?,
    })
}

/// Walk the document and return every leaf element as (path below root, text).
fn collect_leaves(xml: &str) -> Result<Vec<(Vec<String>, String)>, DecodeError> {
    struct Open {
        name: String,
        text: String,
        has_children: bool,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Open> = Vec::new();
    let mut leaves = Vec::new();
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        match event {
            Event::Start(tag) => {
                if stack.is_empty() && saw_root {
                    return Err(DecodeError::Malformed("multiple root elements".to_string()));
                }
                saw_root = true;
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                stack.push(Open {
                    name: String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
                    text: String::new(),
                    has_children: false,
                });
            }
            Event::Empty(tag) => {
                if stack.is_empty() {
                    return Err(DecodeError::Malformed("empty root element".to_string()));
                }
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                let mut path = leaf_path(stack.iter().map(|o| o.name.as_str()));
                path.push(String::from_utf8_lossy(tag.name().as_ref()).into_owned());
                leaves.push((path, String::new()));
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| DecodeError::Malformed(e.to_string()))?;
                match stack.last_mut() {
                    Some(open) => open.text.push_str(&text),
                    None => {
                        return Err(DecodeError::Malformed(format!(
                            "text outside root element: {:?}",
                            text
                        )));
                    }
                }
            }
            Event::CData(data) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                let open = stack
                    .pop()
                    .ok_or_else(|| DecodeError::Malformed("unbalanced end tag".to_string()))?;
                // The root itself is never a leaf.
                if !open.has_children && !stack.is_empty() {
                    let mut path = leaf_path(stack.iter().map(|o| o.name.as_str()));
                    path.push(open.name);
                    leaves.push((path, open.text));
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(DecodeError::Malformed(format!(
            "unclosed element <{}>",
            open.name
        )));
    }
    if !saw_root {
        return Err(DecodeError::Malformed("no root element".to_string()));
    }

    Ok(leaves)
}

/// Path from below the root element down to the current open element
fn leaf_path<'a>(open: impl Iterator<Item = &'a str>) -> Vec<String> {
    open.skip(1).map(str::to_string).collect()
}

fn channel_index(block: &str) -> Option<u32> {
    block.strip_prefix(CHANNEL_PREFIX)?.parse().ok()
}

/// Remove exactly one layer of matching quotes.
pub fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn required<'a>(params: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str, DecodeError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DecodeError::MissingField(name.to_string()))
}

fn optional_int(params: &BTreeMap<String, String>, name: &str) -> Result<Option<i64>, DecodeError> {
    params
        .get(name)
        .map(|raw| {
            raw.trim().parse::<i64>().map_err(|_| {
                DecodeError::Malformed(format!("`{}` is not an integer: {:?}", name, raw))
            })
        })
        .transpose()
}

fn optional_float(
    params: &BTreeMap<String, String>,
    name: &str,
) -> Result<Option<f64>, DecodeError> {
    params
        .get(name)
        .map(|raw| {
            raw.trim().parse::<f64>().map_err(|_| {
                DecodeError::Malformed(format!("`{}` is not a number: {:?}", name, raw))
            })
        })
        .transpose()
}

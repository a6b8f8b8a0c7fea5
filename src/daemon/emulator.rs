//! Stand-in recorder speaking the daemon's pipe protocol
//!
//! Reads clauses from the command pipe, keeps the recorder settings they
//! change, and answers `xstatus`/`status` with documents in the daemon's own
//! format. No media is captured.

use std::fmt::Write as _;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tracing::{debug, info, warn};

use crate::daemon::command::{parse_clause, Clause, Format};
use crate::daemon::transport;

const DEFAULT_DURATION: i64 = 600;
const DEFAULT_LENGTH: i64 = 1_073_741_824;
const DEFAULT_MAX_FRAMES: i64 = 16384;
const DEFAULT_FRAMES_PER_CHUNK: i64 = 10;
const SENSOR_PORTS: usize = 4;
const FRAME_RATE: f64 = 15.0;
const FRAME_LENGTH: i64 = 200_000;
const BUFFER_SIZE: i64 = 64 * 1024 * 1024;
const RAWDEV_START_OFFSET: u64 = 1024 * 1024;

/// What the emulator does after applying one clause
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Continue,
    Status { target: Option<String>, xml: bool },
    Exit,
}

/// Geotagging parameters
#[derive(Debug, Clone, PartialEq)]
pub struct KmlSettings {
    pub enable: bool,
    /// Degrees
    pub hor_half_fov: f64,
    /// Degrees
    pub vert_half_fov: f64,
    /// Metres to the photo overlay
    pub near: f64,
    /// GPS altitude when set, map ground level otherwise
    pub gps_altitude: bool,
    pub height: f64,
    pub period: i64,
}

impl Default for KmlSettings {
    fn default() -> Self {
        Self {
            enable: false,
            hor_half_fov: 20.0,
            vert_half_fov: 15.0,
            near: 40.0,
            gps_altitude: false,
            height: 10.0,
            period: 2,
        }
    }
}

impl KmlSettings {
    fn height_mode(&self) -> &'static str {
        if self.gps_altitude {
            "GPS altitude"
        } else {
            "map ground level"
        }
    }
}

/// Audio capture parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub enable: bool,
    pub rate: u32,
    pub channels: u32,
    /// Percent
    pub volume: u32,
    pub allow_sync: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enable: false,
            rate: 44100,
            channels: 2,
            volume: 100,
            allow_sync: false,
        }
    }
}

/// Recorder settings and run state, as the status document reports them
#[derive(Debug, Clone)]
pub struct RecorderModel {
    pub running: bool,
    pub file_name: String,
    pub prefix: String,
    pub format: Format,
    pub start_after_timestamp: f64,
    pub segment_duration: i64,
    pub segment_length: i64,
    pub max_frames: i64,
    pub frames_per_chunk: i64,
    pub timescale: f64,
    /// Positive: frames to skip; negative: timelapse period in seconds
    pub frames_skip: i64,
    pub exif: bool,
    pub save_gp: bool,
    pub greedy: bool,
    pub ignore_fps: bool,
    pub debug_output: String,
    pub debug_level: i64,
    pub kml: KmlSettings,
    pub audio: AudioSettings,
    pub rawdev_path: Option<String>,
    pub ports_active: Vec<bool>,
    started_at: Option<Instant>,
}

impl Default for RecorderModel {
    fn default() -> Self {
        Self {
            running: false,
            file_name: String::new(),
            prefix: String::new(),
            format: Format::None,
            start_after_timestamp: 0.0,
            segment_duration: DEFAULT_DURATION,
            segment_length: DEFAULT_LENGTH,
            max_frames: DEFAULT_MAX_FRAMES,
            frames_per_chunk: DEFAULT_FRAMES_PER_CHUNK,
            timescale: 1.0,
            frames_skip: 0,
            exif: false,
            save_gp: false,
            greedy: false,
            ignore_fps: false,
            debug_output: "stderr".to_string(),
            debug_level: 1,
            kml: KmlSettings::default(),
            audio: AudioSettings::default(),
            rawdev_path: None,
            ports_active: vec![true; SENSOR_PORTS],
            started_at: None,
        }
    }
}

fn int_arg(value: Option<&str>) -> i64 {
    value
        .and_then(|v| {
            let digits = v.trim();
            digits.parse::<i64>().ok().or_else(|| digits.parse::<f64>().ok().map(|f| f as i64))
        })
        .unwrap_or(0)
}

fn float_arg(value: Option<&str>) -> f64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0.0)
}

fn switch_arg(value: Option<&str>) -> Option<bool> {
    match value? {
        "on" | "enable" | "yes" | "1" => Some(true),
        "off" | "disable" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl RecorderModel {
    fn apply(&mut self, clause: &Clause) -> Action {
        let value = clause.value.as_deref();
        match clause.name.as_str() {
            "start" => self.start(),
            "stop" => self.stop(),
            "reset" | "reader_stop" => {}
            "exit" => {
                self.stop();
                return Action::Exit;
            }
            "xstatus" => {
                return Action::Status {
                    target: clause.value.clone(),
                    xml: true,
                }
            }
            "status" => {
                return Action::Status {
                    target: clause.value.clone(),
                    xml: false,
                }
            }
            "prefix" => {
                if let Some(prefix) = value {
                    self.prefix = prefix.to_string();
                }
            }
            "format" => {
                if let Some(format) = value.and_then(|v| v.parse().ok()) {
                    self.format = format;
                }
            }
            "duration" => {
                let d = int_arg(value);
                self.segment_duration = if d > 0 { d } else { DEFAULT_DURATION };
            }
            "length" => {
                let d = int_arg(value);
                self.segment_length = if d > 0 { d } else { DEFAULT_LENGTH };
            }
            "max_frames" => self.max_frames = int_arg(value),
            "frames_per_chunk" => self.frames_per_chunk = int_arg(value),
            "frameskip" => self.frames_skip = int_arg(value),
            "timelapse" => self.frames_skip = -int_arg(value),
            "timescale" => {
                let ts = float_arg(value);
                self.timescale = if ts != 0.0 { ts } else { 1.0 };
            }
            "start_after_timestamp" => self.start_after_timestamp = float_arg(value),
            "exif" => self.exif = int_arg(value) > 0,
            "save_gp" => self.save_gp = int_arg(value) > 0,
            "greedy" => self.greedy = float_arg(value) != 0.0,
            "ignore_fps" => self.ignore_fps = float_arg(value) != 0.0,
            "debug" => self.debug_output = value.unwrap_or("stderr").to_string(),
            "debuglev" => self.debug_level = int_arg(value),
            "kml" => {
                let d = int_arg(value);
                if value.is_some() && d >= 0 {
                    self.kml.enable = d > 0;
                }
            }
            "kml_hhf" => self.kml.hor_half_fov = float_arg(value),
            "kml_vhf" => self.kml.vert_half_fov = float_arg(value),
            "kml_near" => self.kml.near = float_arg(value),
            "kml_alt" => match value {
                Some("gps") => self.kml.gps_altitude = true,
                Some("ground") => self.kml.gps_altitude = false,
                _ => {}
            },
            "kml_height" => self.kml.height = float_arg(value),
            "kml_period" => {
                let d = int_arg(value);
                self.kml.period = if d != 0 { d } else { 1 };
            }
            "audio" => {
                if let Some(enable) = switch_arg(value) {
                    self.audio.enable = enable;
                }
            }
            "audio_format" => {
                // <rate>/<channels>
                if let Some((rate, channels)) = value.and_then(|v| v.split_once('/')) {
                    if let (Ok(rate), Ok(channels)) = (rate.parse(), channels.parse()) {
                        self.audio.rate = rate;
                        self.audio.channels = channels;
                    }
                }
            }
            "audio_volume" => {
                if let Some(volume) = value.and_then(|v| v.parse::<u32>().ok()) {
                    self.audio.volume = volume.min(100);
                }
            }
            "allow_sync" => {
                if let Some(allow) = switch_arg(value) {
                    self.audio.allow_sync = allow;
                }
            }
            "rawdev_path" => {
                self.rawdev_path = value.filter(|p| p.starts_with("/dev/")).map(str::to_string);
            }
            "port_enable" | "port_disable" => {
                let enable = clause.name == "port_enable";
                match usize::try_from(int_arg(value)) {
                    Ok(port) if port < self.ports_active.len() => self.ports_active[port] = enable,
                    _ => warn!("No such sensor port: {:?}", value),
                }
            }
            other => debug!("Ignoring unknown command {:?}", other),
        }
        Action::Continue
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.started_at = Some(Instant::now());
        self.file_name = if self.rawdev_path.is_some() {
            String::new()
        } else {
            format!("{}{}.{}", self.prefix, Utc::now().timestamp(), self.format)
        };
        info!("Recording started: {:?}", self.file_name);
    }

    fn stop(&mut self) {
        if self.running {
            info!("Recording stopped");
        }
        self.running = false;
        self.started_at = None;
    }

    fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn frame_number(&self) -> i64 {
        (self.elapsed().as_secs_f64() * FRAME_RATE) as i64
    }

    fn buffer_used(&self, port: usize) -> i64 {
        if self.running && self.ports_active[port] {
            BUFFER_SIZE / 16
        } else {
            0
        }
    }

    fn kml_used(&self) -> bool {
        self.kml.enable && self.running
    }

    fn rawdev_write_pos(&self) -> u64 {
        match self.rawdev_path {
            Some(_) => RAWDEV_START_OFFSET + (self.frame_number() * FRAME_LENGTH) as u64,
            None => RAWDEV_START_OFFSET,
        }
    }

    /// Status document in the daemon's XML layout
    pub fn render_xml(&self) -> String {
        let elapsed = self.elapsed();
        let (frames_skip, seconds_skip) = self.skip_split();
        let state = if self.running { "running" } else { "stopped" };

        let mut out = String::new();
        let _ = writeln!(out, "<?xml version=\"1.0\"?>");
        let _ = writeln!(out, "<camogm_state>");
        let mut field = |name: &str, value: String| {
            let _ = writeln!(out, "  <{name}>{value}</{name}>");
        };
        let quoted = |s: &str| format!("\"{}\"", s);

        field("state", quoted(state));
        field("file_name", quoted(&self.file_name));
        field("frame_number", self.frame_number().to_string());
        field("start_after_timestamp", format!("{:.6}", self.start_after_timestamp));
        field(
            "file_duration",
            format!("{}.{:06}", elapsed.as_secs(), elapsed.subsec_micros()),
        );
        field("file_length", (self.frame_number() * FRAME_LENGTH).to_string());
        field("frames_skip_left", frames_skip.to_string());
        field("seconds_skip_left", seconds_skip.to_string());
        field("frame_width", "2592".to_string());
        field("frame_height", "1936".to_string());
        field("format", quoted(self.format.as_str()));
        field("exif", quoted(yes_no(self.exif)));
        field("prefix", quoted(&self.prefix));
        field("max_duration", self.segment_duration.to_string());
        field("max_length", self.segment_length.to_string());
        field("max_frames", self.max_frames.to_string());
        field("timescale", format!("{:.6}", self.timescale));
        field("frames_per_chunk", self.frames_per_chunk.to_string());
        field("last_error_code", "0".to_string());
        field("debug_output", quoted(&self.debug_output));
        field("debug_level", self.debug_level.to_string());
        field("use_global_rp", quoted(yes_no(self.save_gp)));
        field("kml_enable", quoted(yes_no(self.kml.enable)));
        field("kml_used", quoted(yes_no(self.kml_used())));
        field("kml_path", quoted(""));
        field("kml_horHalfFov", quoted(&format!("{:.6}", self.kml.hor_half_fov)));
        field("kml_vertHalfFov", quoted(&format!("{:.6}", self.kml.vert_half_fov)));
        field("kml_near", quoted(&format!("{:.6}", self.kml.near)));
        field("kml_height_mode", quoted(self.kml.height_mode()));
        field("kml_height", quoted(&format!("{:.6}", self.kml.height)));
        field("kml_period", self.kml.period.to_string());
        field("kml_last_ts", "0.000000".to_string());
        field("greedy", quoted(yes_no(self.greedy)));
        field("ignore_fps", quoted(yes_no(self.ignore_fps)));
        field(
            "raw_device_path",
            quoted(self.rawdev_path.as_deref().unwrap_or_default()),
        );
        field("raw_device_overruns", "0".to_string());
        field("raw_device_pos_write", format!("{:#x}", self.rawdev_write_pos()));
        field(
            "raw_device_pos_read",
            format!("{:#x} (0% done)", RAWDEV_START_OFFSET),
        );
        field("audio_enable", quoted(yes_no(self.audio.enable)));
        field("audio_channels", quoted(&self.audio.channels.to_string()));
        field("audio_rate", quoted(&self.audio.rate.to_string()));
        field("audio_volume", quoted(&self.audio.volume.to_string()));
        field("allow_sync", quoted(yes_no(self.audio.allow_sync)));

        for (port, active) in self.ports_active.iter().enumerate() {
            let used = self.buffer_used(port);
            let free = BUFFER_SIZE - used;
            let _ = writeln!(out, "\t<sensor_port_{port}>");
            let _ = writeln!(out, "\t\t<channel_active>\"{}\"</channel_active>", yes_no(*active));
            let _ = writeln!(
                out,
                "\t\t<compressor_state>\"{}\"</compressor_state>",
                if *active { "running" } else { "stopped" }
            );
            let _ = writeln!(out, "\t\t<frame_size>{FRAME_LENGTH}</frame_size>");
            let _ = writeln!(out, "\t\t<frames_skip>{frames_skip}</frames_skip>");
            let _ = writeln!(out, "\t\t<seconds_skip>{seconds_skip}</seconds_skip>");
            let _ = writeln!(out, "\t\t<buffer_overruns>0</buffer_overruns>");
            let _ = writeln!(out, "\t\t<buffer_minimal>{free}</buffer_minimal>");
            let _ = writeln!(out, "\t\t<frame_period>{}</frame_period>", (1e6 / FRAME_RATE) as i64);
            let _ = writeln!(out, "\t\t<buffer_free>{free}</buffer_free>");
            let _ = writeln!(out, "\t\t<buffer_used>{used}</buffer_used>");
            let _ = writeln!(out, "\t\t<circbuf_rp>{}</circbuf_rp>", if *active { 0 } else { -1 });
            let _ = writeln!(out, "\t</sensor_port_{port}>");
        }
        let _ = writeln!(out, "</camogm_state>");
        out
    }

    /// Plain-text status report
    pub fn render_text(&self) -> String {
        let elapsed = self.elapsed();
        let state = if self.running { "running" } else { "stopped" };
        let rawdev = self.rawdev_path.as_deref().unwrap_or_default();

        let mut out = String::new();
        let _ = writeln!(out, "state              \t{}", state);
        let _ = writeln!(out, "file               \t{}", self.file_name);
        let _ = writeln!(out, "frame              \t{}", self.frame_number());
        let _ = writeln!(
            out,
            "file duration      \t{}.{:06} sec",
            elapsed.as_secs(),
            elapsed.subsec_micros()
        );
        let _ = writeln!(out, "output format      \t{}", self.format);
        let _ = writeln!(out, "path prefix        \t{}", self.prefix);
        let _ = writeln!(out, "raw device path    \t{}", rawdev);
        let _ = writeln!(out, "max file duration  \t{} sec", self.segment_duration);
        let _ = writeln!(out, "max file length    \t{} B", self.segment_length);
        let _ = writeln!(out, "debug level        \t{}", self.debug_level);
        let _ = writeln!(out, "kml_enable         \t{}", yes_no(self.kml.enable));
        let _ = writeln!(out, "kml_horHalfFov     \t{:.6} degrees", self.kml.hor_half_fov);
        let _ = writeln!(out, "kml_vertHalfFov    \t{:.6} degrees", self.kml.vert_half_fov);
        let _ = writeln!(out, "kml_near           \t{:.6} m", self.kml.near);
        let _ = writeln!(out, "kml height mode    \t{}", self.kml.height_mode());
        let _ = writeln!(out, "kml_height (extra) \t{:.6} m", self.kml.height);
        let _ = writeln!(out, "kml_period         \t{}", self.kml.period);
        out
    }

    fn skip_split(&self) -> (i64, i64) {
        match self.frames_skip {
            n if n > 0 => (n, 0),
            n if n < 0 => (0, -n),
            _ => (0, 0),
        }
    }
}

/// The emulated recorder bound to a command pipe
pub struct Emulator {
    command_pipe: PathBuf,
    pipe_mode: u32,
    write_timeout: Duration,
    poll_interval: Duration,
    recorder: RecorderModel,
}

impl Emulator {
    pub fn new(command_pipe: impl Into<PathBuf>) -> Self {
        Self {
            command_pipe: command_pipe.into(),
            pipe_mode: 0o777,
            write_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            recorder: RecorderModel::default(),
        }
    }

    pub fn with_pipe_mode(mut self, mode: u32) -> Self {
        self.pipe_mode = mode;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll_interval = poll;
        self
    }

    pub fn recorder(&self) -> &RecorderModel {
        &self.recorder
    }

    /// Serve the command pipe until an `exit` command arrives.
    pub async fn run(&mut self) -> Result<()> {
        transport::ensure_fifo(&self.command_pipe, self.pipe_mode)?;

        // Holding a write end too keeps reads from hitting EOF between clients.
        let mut receiver = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&self.command_pipe)
            .with_context(|| format!("Failed to open command pipe {:?}", self.command_pipe))?;
        info!("Emulated recorder listening on {:?}", self.command_pipe);

        let mut pending = String::new();
        let mut chunk = vec![0u8; 1024];
        loop {
            let n = receiver.read(&mut chunk).await?;
            if n == 0 {
                continue;
            }
            pending.push_str(&String::from_utf8_lossy(&chunk[..n]));

            while let Some(end) = pending.find([';', '\n']) {
                let raw: String = pending.drain(..=end).collect();
                let Some(clause) = parse_clause(&raw[..raw.len() - 1]) else {
                    continue;
                };
                debug!("Got command: {:?}", clause);

                match self.recorder.apply(&clause) {
                    Action::Continue => {}
                    Action::Status { target, xml } => {
                        let body = if xml {
                            self.recorder.render_xml()
                        } else {
                            self.recorder.render_text()
                        };
                        if let Err(e) = self.write_status(target.as_deref(), &body).await {
                            warn!("Failed to deliver status: {:#}", e);
                        }
                    }
                    Action::Exit => {
                        info!("Exit requested");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn write_status(&self, target: Option<&str>, body: &str) -> Result<()> {
        match target {
            None | Some("stdout") => print!("{}", body),
            Some("stderr") => eprint!("{}", body),
            Some(path) => {
                let path = Path::new(path);
                let is_fifo = std::fs::metadata(path)
                    .map(|m| m.file_type().is_fifo())
                    .unwrap_or(false);
                if is_fifo {
                    transport::send(path, body, self.write_timeout, self.poll_interval).await?;
                } else {
                    tokio::fs::write(path, body)
                        .await
                        .with_context(|| format!("Failed to write status to {:?}", path))?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        let _ = transport::remove_fifo(&self.command_pipe);
    }
}

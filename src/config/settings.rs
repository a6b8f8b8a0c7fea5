//! Application settings management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Command and status pipe settings
    #[serde(default)]
    pub pipes: PipeSettings,

    /// Timeouts for talking to the recorder
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// How to launch the recorder daemon
    #[serde(default)]
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeSettings {
    /// Pipe the recorder reads commands from
    #[serde(default = "default_command_pipe")]
    pub command_pipe: PathBuf,

    /// Status pipe path (or base path when unique pipes are enabled)
    #[serde(default = "default_status_pipe")]
    pub status_pipe: PathBuf,

    /// Use a single-use status pipe per request
    #[serde(default = "default_true")]
    pub unique_status_pipes: bool,

    /// Permission bits for created pipes
    #[serde(default = "default_pipe_mode")]
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Bound on opening and writing the command pipe, in milliseconds
    #[serde(default = "default_send_ms")]
    pub send_ms: u64,

    /// Bound on waiting for a status reply, in milliseconds
    #[serde(default = "default_status_ms")]
    pub status_ms: u64,

    /// Retry interval while waiting for the other end of a pipe
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Recorder executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Port passed to the recorder with `-p`
    #[serde(default = "default_port")]
    pub port: u16,

    /// File where the recorder keeps its raw-device write pointer
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// How long to wait for the command pipe after launch, in milliseconds
    #[serde(default = "default_startup_wait_ms")]
    pub startup_wait_ms: u64,

    /// Command lines sent once after launching the recorder
    #[serde(default = "default_initial_commands")]
    pub initial_commands: Vec<String>,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_command_pipe() -> PathBuf {
    PathBuf::from("/var/state/camogm_cmd")
}

fn default_status_pipe() -> PathBuf {
    PathBuf::from("/var/state/camogm.state")
}

fn default_true() -> bool {
    true
}

fn default_pipe_mode() -> u32 {
    0o777
}

fn default_send_ms() -> u64 {
    2000
}

fn default_status_ms() -> u64 {
    5000
}

fn default_poll_ms() -> u64 {
    20
}

fn default_binary() -> PathBuf {
    PathBuf::from("camogm")
}

fn default_port() -> u16 {
    3456
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/home/root/camogm.disk")
}

fn default_startup_wait_ms() -> u64 {
    5000
}

fn default_initial_commands() -> Vec<String> {
    vec!["format=mov".to_string(), "save_gp=1".to_string()]
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for PipeSettings {
    fn default() -> Self {
        Self {
            command_pipe: default_command_pipe(),
            status_pipe: default_status_pipe(),
            unique_status_pipes: true,
            mode: default_pipe_mode(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            send_ms: default_send_ms(),
            status_ms: default_status_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            port: default_port(),
            state_file: default_state_file(),
            startup_wait_ms: default_startup_wait_ms(),
            initial_commands: default_initial_commands(),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::debug!("No config file found, using defaults");
            let mut settings = Self::default();
            settings.apply_env_overrides();
            return Ok(settings);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut settings = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CAMCTL_COMMAND_PIPE") {
            if !path.trim().is_empty() {
                self.pipes.command_pipe = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("CAMCTL_STATUS_PIPE") {
            if !path.trim().is_empty() {
                self.pipes.status_pipe = PathBuf::from(path);
            }
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", crate::APP_NAME, crate::APP_NAME)
            .context("Could not determine config directory")?;

        let config_dir = dirs.config_dir();
        Ok(config_dir.join("config.toml"))
    }

    /// Write default configuration to a file
    pub fn write_default(path: &PathBuf) -> Result<()> {
        let settings = Self::default();
        let content = toml::to_string_pretty(&settings)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.send_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.status_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.poll_ms.max(1))
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.daemon.startup_wait_ms)
    }
}

//! CLI argument definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// camctl - Control the camogm camera recorder
#[derive(Parser, Debug)]
#[command(name = "camctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start recording
    Start {
        /// Also fetch the recorder status afterwards
        #[arg(short, long)]
        status: bool,
    },

    /// Stop recording
    Stop {
        /// Also fetch the recorder status afterwards
        #[arg(short, long)]
        status: bool,
    },

    /// Stop recording and terminate the recorder
    Exit,

    /// Show the recorder status
    Status {
        /// Print the snapshot as JSON
        #[arg(long, conflicts_with = "raw")]
        json: bool,

        /// Print the status document exactly as the recorder wrote it
        #[arg(long)]
        raw: bool,
    },

    /// Change a recorder setting
    Set {
        /// Setting to change
        #[arg(value_enum)]
        key: SettingKey,

        /// New value (`none` clears rawdev-path, `pN` for start-after means N seconds from now)
        value: String,

        /// Also fetch the recorder status afterwards
        #[arg(short, long)]
        status: bool,
    },

    /// Send arbitrary command text to the recorder
    Send {
        /// A single clause such as `kml_alt=gps`
        text: String,
    },

    /// Recorder process management
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Run a stand-in recorder on the configured command pipe
    Emulate,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Settings that `camctl set` knows how to encode
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKey {
    Prefix,
    Format,
    Debuglev,
    Duration,
    Length,
    MaxFrames,
    FramesPerChunk,
    Frameskip,
    Timelapse,
    Timescale,
    Exif,
    RawdevPath,
    StartAfter,
    Kml,
    KmlPeriod,
    Greedy,
    IgnoreFps,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Launch the recorder if it is not running
    Start,

    /// Ask the recorder to exit
    Stop,

    /// Check whether the recorder is running
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn set_accepts_kebab_case_keys() {
        let cli = Cli::parse_from(["camctl", "set", "start-after", "p3"]);
        match cli.command {
            Commands::Set { key, value, status } => {
                assert_eq!(key, SettingKey::StartAfter);
                assert_eq!(value, "p3");
                assert!(!status);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn status_flags_conflict() {
        assert!(Cli::try_parse_from(["camctl", "status", "--json", "--raw"]).is_err());
    }
}

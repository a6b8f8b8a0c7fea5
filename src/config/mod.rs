//! Configuration module for camctl
//!
//! Handles loading and managing application settings from TOML files.

mod settings;

pub use settings::{DaemonSettings, GeneralSettings, PipeSettings, Settings, TimeoutSettings};

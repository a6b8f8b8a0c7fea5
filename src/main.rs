//! camctl - Control the camogm camera recorder
//!
//! Entry point for the camctl CLI application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use camctl::cli::{commands, Cli, Commands};
use camctl::config::Settings;

fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        camctl::cli::completions::print(shell);
        return Ok(());
    }

    // Load configuration only for runtime commands.
    let settings = Settings::load()?;

    let level = if cli.verbose {
        "debug"
    } else {
        settings.general.log_level.as_str()
    };
    init_logging(level);

    match cli.command {
        Commands::Start { status } => {
            commands::start_recording(&settings, status).await?;
        }
        Commands::Stop { status } => {
            commands::stop_recording(&settings, status).await?;
        }
        Commands::Exit => {
            commands::exit_recorder(&settings).await?;
        }
        Commands::Status { json, raw } => {
            commands::show_status(&settings, json, raw).await?;
        }
        Commands::Set { key, value, status } => {
            commands::set_value(&settings, key, &value, status).await?;
        }
        Commands::Send { text } => {
            commands::send_text(&settings, &text).await?;
        }
        Commands::Daemon(daemon_cmd) => {
            commands::daemon_command(&settings, daemon_cmd).await?;
        }
        Commands::Emulate => {
            commands::run_emulator(&settings).await?;
        }
        Commands::Config(config_cmd) => {
            commands::config_command(&settings, config_cmd)?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

//! tmibot command line entry point.
//!
//! ```bash
//! tmibot                      # channels from tmibot.toml
//! tmibot lobby games          # override the channel list
//! tmibot --profile dev --no-console
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tmibot::runtime::tracing::error;
use tmibot::{BotRuntime, RuntimeError, register_admin_commands};

/// Blocking stdin reads may still be parked when the bot stops.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "tmibot", version, about = "Twitch chat bot")]
struct Cli {
    /// Channels to join, replacing the configured list.
    channels: Vec<String>,

    /// Configuration file to load instead of searching for tmibot.toml.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Configuration profile (loads tmibot.<profile>.toml first).
    #[arg(short, long)]
    profile: Option<String>,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    no_console: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(run(cli));
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tmibot exited with an error");
            eprintln!("tmibot: {e:#}");
            match e.downcast_ref::<RuntimeError>() {
                Some(RuntimeError::LoginFailed { .. }) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut builder = BotRuntime::builder().handlers(register_admin_commands);
    if let Some(path) = cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = cli.profile {
        builder = builder.profile(profile);
    }
    if !cli.channels.is_empty() {
        builder = builder.channels(cli.channels);
    }
    if cli.no_console {
        builder = builder.console(false);
    }

    let runtime = builder.build()?;
    runtime.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channels_and_flags() {
        let cli = Cli::parse_from(["tmibot", "lobby", "games", "--no-console", "-c", "bot.toml"]);
        assert_eq!(cli.channels, vec!["lobby", "games"]);
        assert!(cli.no_console);
        assert_eq!(cli.config, Some(PathBuf::from("bot.toml")));
    }

    #[test]
    fn no_arguments_keeps_config_defaults() {
        let cli = Cli::parse_from(["tmibot"]);
        assert!(cli.channels.is_empty());
        assert!(!cli.no_console);
        assert!(cli.config.is_none());
    }
}

//! lowlight - command-line client for the low-light image enhancement service.
//!
//! Log in once, send dark photos for enhancement, and keep track of the
//! results for the 24 hours the service retains them.

mod commands;
mod prompt;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lowlight_core::Config;

#[derive(Debug, Parser)]
#[command(name = "lowlight", version, about = "Enhance low-light photos")]
struct Cli {
    /// Service base URL (overrides config and LOWLIGHT_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and remember the session
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "LOWLIGHT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and log into it
    Register {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, env = "LOWLIGHT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log out and forget this session's results
    Logout,
    /// Show the current session
    Whoami,
    /// Send an image for enhancement
    Enhance {
        path: PathBuf,
        /// Also save the enhanced image here
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// List results that are still available
    List,
    /// Forget a result (and delete it on the server)
    Remove { id: String },
    /// Save an enhanced image to disk
    Download { id: String, output: PathBuf },
    /// List the enhancement models the service offers
    Models,
    /// Keep running and purge results as they expire
    Watch,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "lowlight.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Tracing is configured from the config, so report a bad config file
    // only once logging is up.
    let loaded = Config::load();
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    config.apply_env();
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let _guard = init_tracing(config.log_file.as_ref());
    if let Err(e) = loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    info!(api = %config.api_base_url, "lowlight starting");
    debug!(?config, "Configuration loaded");

    let result = commands::run(cli.command, config).await;

    if let Err(ref e) = result {
        debug!(error = %e, "Command failed");
    }
    result
}

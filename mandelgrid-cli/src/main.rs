//! Mandelgrid CLI - coordinator entry point
//!
//! Parses the coordinator's flags, builds [`Settings`], and hands off to the
//! runner. CLI arguments fully determine the configuration; there is no
//! config file.

mod error;
mod runner;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use error::CliError;
use mandelgrid::config::{
    parse_level_specs, ChannelLog, Settings, DEFAULT_DISPATCHER_PORT, DEFAULT_TILE_SERVER_PORT,
};

// ============================================================================
// CLI Argument Definitions
// ============================================================================

#[derive(Parser)]
#[command(name = "mandelgrid")]
#[command(version = mandelgrid::VERSION)]
#[command(about = "Coordinator for distributed Mandelbrot tile computation", long_about = None)]
struct Cli {
    /// Owned levels and their recursion caps, e.g. "2:100,4:200"
    #[arg(short = 'l', long = "levels", value_name = "L:D,L:D,…")]
    levels: String,

    /// Apply the per-read socket timeout to connection handlers
    #[arg(
        short = 't',
        long = "timeout",
        value_name = "true|false",
        default_value_t = true,
        action = ArgAction::Set
    )]
    timeout: bool,

    /// Bind address for the worker-facing dispatcher
    #[arg(long = "distributer-addr", value_name = "ADDR", default_value = "0.0.0.0")]
    distributer_addr: IpAddr,

    /// Port for the worker-facing dispatcher
    #[arg(long = "distributer-port", value_name = "PORT", default_value_t = DEFAULT_DISPATCHER_PORT)]
    distributer_port: u16,

    /// Bind address for the client-facing tile server
    #[arg(long = "data-server-addr", value_name = "ADDR", default_value = "0.0.0.0")]
    data_server_addr: IpAddr,

    /// Port for the client-facing tile server
    #[arg(long = "data-server-port", value_name = "PORT", default_value_t = DEFAULT_TILE_SERVER_PORT)]
    data_server_port: u16,

    /// Emit info-level dispatcher events
    #[arg(
        long = "distributer-log-info",
        value_name = "true|false",
        default_value_t = true,
        action = ArgAction::Set
    )]
    distributer_log_info: bool,

    /// Emit error-level dispatcher events
    #[arg(
        long = "distributer-log-error",
        value_name = "true|false",
        default_value_t = true,
        action = ArgAction::Set
    )]
    distributer_log_error: bool,

    /// Emit info-level tile-server events
    #[arg(
        long = "data-server-log-info",
        value_name = "true|false",
        default_value_t = true,
        action = ArgAction::Set
    )]
    data_server_log_info: bool,

    /// Emit error-level tile-server events
    #[arg(
        long = "data-server-log-error",
        value_name = "true|false",
        default_value_t = true,
        action = ArgAction::Set
    )]
    data_server_log_error: bool,

    /// Parent directory for the data directory (default: working directory)
    #[arg(short = 'o', long = "data-directory", value_name = "PATH")]
    data_directory: Option<PathBuf>,
}

fn build_settings(cli: Cli) -> Result<Settings, CliError> {
    let levels =
        parse_level_specs(&cli.levels).map_err(|err| CliError::Config(err.to_string()))?;

    let mut settings = Settings::new(levels);
    settings.timeout_enabled = cli.timeout;
    settings.dispatcher_endpoint = SocketAddr::new(cli.distributer_addr, cli.distributer_port);
    settings.tile_server_endpoint = SocketAddr::new(cli.data_server_addr, cli.data_server_port);
    settings.dispatcher_log = ChannelLog {
        info: cli.distributer_log_info,
        error: cli.distributer_log_error,
    };
    settings.tile_server_log = ChannelLog {
        info: cli.data_server_log_info,
        error: cli.data_server_log_error,
    };
    if let Some(parent) = cli.data_directory {
        settings.data_parent = parent;
    }

    Ok(settings)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match build_settings(cli) {
        Ok(settings) => settings,
        Err(err) => err.exit(),
    };

    if let Err(err) = runner::run(settings).await {
        err.exit();
    }
}

//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and a non-zero exit code for every failure class.

use std::fmt;
use std::io;
use std::process;

use mandelgrid::leaseboard::LeaseboardError;
use mandelgrid::storage::StorageError;
use mandelgrid::store::StoreError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(io::Error),
    /// Configuration error (bad flag values)
    Config(String),
    /// Failed to open the tile store
    Store(StoreError),
    /// A storage job failed during startup
    Storage(StorageError),
    /// Level ownership conflict
    Leaseboard(LeaseboardError),
    /// Failed to bind a listener
    Bind {
        server: &'static str,
        error: io::Error,
    },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Bind { .. } = self {
            eprintln!();
            eprintln!("Common issues:");
            eprintln!("  1. The port is already in use by another coordinator");
            eprintln!("  2. Binding a privileged port requires elevated rights");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(err) => write!(f, "Failed to initialize logging: {}", err),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Store(err) => write!(f, "Failed to open tile store: {}", err),
            CliError::Storage(err) => write!(f, "Storage failure during startup: {}", err),
            CliError::Leaseboard(err) => write!(f, "Level configuration conflict: {}", err),
            CliError::Bind { server, error } => {
                write!(f, "Failed to bind {} listener: {}", server, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(err) => Some(err),
            CliError::Store(err) => Some(err),
            CliError::Storage(err) => Some(err),
            CliError::Leaseboard(err) => Some(err),
            CliError::Bind { error, .. } => Some(error),
            CliError::Config(_) => None,
        }
    }
}

//! Logging infrastructure for the coordinator.
//!
//! Structured logging with dual output:
//! - Writes to `logs/mandelgrid.log` (cleared on session start)
//! - Also prints to stdout for terminal tailing
//! - Configurable via RUST_LOG, with the per-channel CLI toggles layered on
//!   top as per-target filter directives

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ChannelLog;

/// Log target used by the dispatcher's connection events.
pub const DISPATCHER_TARGET: &str = "mandelgrid::dispatcher";

/// Log target used by the tile server's connection events.
pub const TILE_SERVER_TARGET: &str = "mandelgrid::tileserver";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the logging system.
///
/// The per-channel toggles restrict what each server emits: disabling info
/// leaves only errors, disabling both silences the channel. Info cannot be
/// kept while errors are dropped (levels are hierarchical), so an
/// errors-only-off toggle also drops info for that channel.
pub fn init_logging(
    log_dir: &str,
    log_file: &str,
    dispatcher: ChannelLog,
    tile_server: ChannelLog,
) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    // Clear the previous session's log.
    let log_path = Path::new(log_dir).join(log_file);
    fs::write(&log_path, "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true);

    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in channel_directives(dispatcher, tile_server) {
        env_filter = env_filter.add_directive(
            directive
                .parse()
                .expect("channel filter directive must parse"),
        );
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory path.
pub fn default_log_dir() -> &'static str {
    "logs"
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "mandelgrid.log"
}

fn channel_directives(dispatcher: ChannelLog, tile_server: ChannelLog) -> Vec<String> {
    let mut directives = Vec::new();

    for (target, channel) in [
        (DISPATCHER_TARGET, dispatcher),
        (TILE_SERVER_TARGET, tile_server),
    ] {
        match (channel.info, channel.error) {
            (true, _) => {}
            (false, true) => directives.push(format!("{}=error", target)),
            (false, false) => directives.push(format!("{}=off", target)),
        }
    }

    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(info: bool, error: bool) -> ChannelLog {
        ChannelLog { info, error }
    }

    #[test]
    fn test_default_toggles_add_no_directives() {
        let directives = channel_directives(channel(true, true), channel(true, true));
        assert!(directives.is_empty());
    }

    #[test]
    fn test_info_off_narrows_to_errors() {
        let directives = channel_directives(channel(false, true), channel(true, true));
        assert_eq!(directives, vec![format!("{}=error", DISPATCHER_TARGET)]);
    }

    #[test]
    fn test_both_off_silences_channel() {
        let directives = channel_directives(channel(true, true), channel(false, false));
        assert_eq!(directives, vec![format!("{}=off", TILE_SERVER_TARGET)]);
    }

    #[test]
    fn test_directives_parse_as_filters() {
        for directive in channel_directives(channel(false, true), channel(false, false)) {
            directive
                .parse::<tracing_subscriber::filter::Directive>()
                .unwrap();
        }
    }
}

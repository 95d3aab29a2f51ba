//! Coordinator configuration.
//!
//! Holds the owned-level table, listener endpoints, socket-timeout and
//! per-channel log toggles, and the storage parent directory. The CLI layer
//! populates this from flags; defaults match a single-host deployment.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default Dispatcher endpoint.
pub const DEFAULT_DISPATCHER_PORT: u16 = 59010;

/// Default TileServer endpoint.
pub const DEFAULT_TILE_SERVER_PORT: u16 = 59011;

/// Default per-read socket timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(3600);

/// Default period of the lease sweeper.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(300);

/// One owned level and the recursion cap advertised with its leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSpec {
    /// Grid dimension this coordinator distributes.
    pub level: u32,
    /// Worker-side recursion cap for tiles of this level.
    pub max_depth: u32,
}

/// Per-channel log toggles.
#[derive(Debug, Clone, Copy)]
pub struct ChannelLog {
    /// Emit info-level events for this channel.
    pub info: bool,
    /// Emit error-level events for this channel.
    pub error: bool,
}

impl Default for ChannelLog {
    fn default() -> Self {
        ChannelLog {
            info: true,
            error: true,
        }
    }
}

/// Complete coordinator settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Owned levels in configuration order; the order drives workload
    /// enumeration.
    pub levels: Vec<LevelSpec>,
    /// Apply the per-read socket timeout to connection handlers.
    pub timeout_enabled: bool,
    /// Dispatcher (worker-facing) listener endpoint.
    pub dispatcher_endpoint: SocketAddr,
    /// TileServer (client-facing) listener endpoint.
    pub tile_server_endpoint: SocketAddr,
    /// Dispatcher log channel toggles.
    pub dispatcher_log: ChannelLog,
    /// TileServer log channel toggles.
    pub tile_server_log: ChannelLog,
    /// Parent directory of the data directory.
    pub data_parent: PathBuf,
}

impl Settings {
    /// Settings for the given levels with every other field defaulted.
    pub fn new(levels: Vec<LevelSpec>) -> Settings {
        Settings {
            levels,
            timeout_enabled: true,
            dispatcher_endpoint: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_DISPATCHER_PORT,
            ),
            tile_server_endpoint: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_TILE_SERVER_PORT,
            ),
            dispatcher_log: ChannelLog::default(),
            tile_server_log: ChannelLog::default(),
            data_parent: PathBuf::from("."),
        }
    }

    /// The owned levels without their depth caps.
    pub fn owned_levels(&self) -> Vec<u32> {
        self.levels.iter().map(|spec| spec.level).collect()
    }
}

/// Errors from parsing configuration values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The level list is empty
    EmptyLevels,
    /// A level entry is not of the form `level:maxDepth`
    InvalidLevelSpec(String),
    /// A level of zero was configured
    ZeroLevel,
    /// The same level appears twice
    DuplicateLevel(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyLevels => write!(f, "at least one level must be configured"),
            ConfigError::InvalidLevelSpec(entry) => {
                write!(
                    f,
                    "invalid level entry '{}' (expected 'level:maxDepth')",
                    entry
                )
            }
            ConfigError::ZeroLevel => write!(f, "level 0 has no tiles to distribute"),
            ConfigError::DuplicateLevel(level) => {
                write!(f, "level {} is configured more than once", level)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parses an owned-level list of the form `"L:D,L:D,…"`.
///
/// Order is preserved; it determines workload enumeration order.
pub fn parse_level_specs(input: &str) -> Result<Vec<LevelSpec>, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::EmptyLevels);
    }

    let mut specs: Vec<LevelSpec> = Vec::new();

    for entry in input.split(',') {
        let entry = entry.trim();
        let (level, depth) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidLevelSpec(entry.to_string()))?;

        let level: u32 = level
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidLevelSpec(entry.to_string()))?;
        let max_depth: u32 = depth
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidLevelSpec(entry.to_string()))?;

        if level == 0 {
            return Err(ConfigError::ZeroLevel);
        }
        if specs.iter().any(|spec| spec.level == level) {
            return Err(ConfigError::DuplicateLevel(level));
        }

        specs.push(LevelSpec { level, max_depth });
    }

    Ok(specs)
}

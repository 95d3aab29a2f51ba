//! Mandelgrid - Coordinator for distributed Mandelbrot tile computation
//!
//! This library is the server side of a distributed Mandelbrot renderer: it
//! farms tile assignments out to remote workers over TCP, accepts their
//! completed tiles, persists them to disk, and serves the persisted tiles
//! to downstream clients.
//!
//! # Subsystems
//!
//! In dependency order:
//!
//! - [`codec`]: self-describing tile serialization (raw / run-length, with a
//!   shortest-output selector)
//! - [`store`]: append-only index plus per-tile data files
//! - [`storage`]: single-consumer job queue serialising all store access
//! - [`leaseboard`]: outstanding leases and completed tiles for the owned
//!   levels
//! - [`dispatcher`]: worker-facing TCP listener handing out leases
//! - [`tileserver`]: client-facing TCP listener answering tile queries

pub mod codec;
pub mod config;
pub mod coord;
pub mod dispatcher;
pub mod leaseboard;
pub mod logging;
pub mod protocol;
pub mod storage;
pub mod store;
pub mod tile;
pub mod tileserver;

/// Version of the mandelgrid library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Process wiring for the coordinator.
//!
//! Builds the storage stack, seeds the leaseboard from persisted tiles,
//! starts both servers and the lease sweeper, then waits for Ctrl-C and
//! shuts everything down through one cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mandelgrid::config::{Settings, DEFAULT_LEASE_TTL, DEFAULT_SWEEP_PERIOD};
use mandelgrid::dispatcher::Dispatcher;
use mandelgrid::leaseboard::{self, Leaseboard, LevelRegistry};
use mandelgrid::logging;
use mandelgrid::protocol::SocketConfig;
use mandelgrid::storage::StorageWorker;
use mandelgrid::store::TileStore;
use mandelgrid::tileserver::TileServer;

use crate::error::CliError;

/// Runs the coordinator until Ctrl-C.
pub async fn run(settings: Settings) -> Result<(), CliError> {
    let _logging = logging::init_logging(
        logging::default_log_dir(),
        logging::default_log_file(),
        settings.dispatcher_log,
        settings.tile_server_log,
    )
    .map_err(CliError::LoggingInit)?;

    info!(
        version = mandelgrid::VERSION,
        levels = settings.levels.len(),
        "Coordinator starting"
    );

    // Storage stack: one store, one worker serialising access to it.
    let store = TileStore::open(&settings.data_parent).map_err(CliError::Store)?;
    let storage = StorageWorker::spawn(store);

    // Lease state, seeded from what previous runs already persisted.
    let registry = Arc::new(LevelRegistry::new());
    let board = Arc::new(
        Leaseboard::new(settings.levels.clone(), DEFAULT_LEASE_TTL, registry)
            .map_err(CliError::Leaseboard)?,
    );

    let persisted = storage
        .enumerate(settings.owned_levels())
        .await
        .map_err(CliError::Storage)?;
    board.seed(&persisted);

    // Bind both listeners before serving anything, so endpoint conflicts
    // fail the process instead of limping along half-up.
    let dispatcher_listener =
        Dispatcher::bind(settings.dispatcher_endpoint).map_err(|error| CliError::Bind {
            server: "dispatcher",
            error,
        })?;
    let tile_listener =
        TileServer::bind(settings.tile_server_endpoint).map_err(|error| CliError::Bind {
            server: "tile server",
            error,
        })?;

    let socket = SocketConfig::new(settings.timeout_enabled);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&board),
        storage.clone(),
        socket,
    ));
    let tile_server = Arc::new(TileServer::new(storage.clone(), socket));

    let shutdown = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(dispatcher.run(dispatcher_listener, shutdown.clone())),
        tokio::spawn(tile_server.run(tile_listener, shutdown.clone())),
        tokio::spawn(leaseboard::run_sweeper(
            Arc::clone(&board),
            DEFAULT_SWEEP_PERIOD,
            shutdown.clone(),
        )),
    ];

    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown requested");
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }

    info!("Coordinator stopped");
    Ok(())
}

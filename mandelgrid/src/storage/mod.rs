//! Storage worker: a single-consumer job queue over the tile store.
//!
//! Network handlers must never hold the store's index lock across their own
//! latency, so they never call the store directly. Instead they submit a job
//! through a [`StorageHandle`] and await a per-job completion channel. One
//! background thread drains the queue FIFO and executes jobs against the
//! [`TileStore`] one at a time, which also serialises enumeration against
//! appends.
//!
//! The queue is unbounded; the number of concurrently connected handlers
//! bounds it in practice. Exactly one worker is constructed per process, by
//! the process wiring.

use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::coord::TileCoord;
use crate::store::{IndexEntry, StoreError, TileStore};
use crate::tile::Tile;

/// Errors surfaced to a job submitter.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store operation itself failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker thread has exited and can take no more jobs
    #[error("storage worker is no longer running")]
    WorkerGone,
}

enum Job {
    Enumerate {
        owned: Vec<u32>,
        reply: oneshot::Sender<Result<Vec<IndexEntry>, StoreError>>,
    },
    Lookup {
        coords: Vec<TileCoord>,
        reply: oneshot::Sender<Result<Vec<Option<IndexEntry>>, StoreError>>,
    },
    LoadPayload {
        entry: IndexEntry,
        reply: oneshot::Sender<Result<Tile, StoreError>>,
    },
    Save {
        coord: TileCoord,
        tile: Tile,
        reply: Option<oneshot::Sender<Result<IndexEntry, StoreError>>>,
    },
}

/// The background executor owning the tile store.
pub struct StorageWorker {
    store: TileStore,
    jobs: mpsc::Receiver<Job>,
}

/// Cloneable submitter for storage jobs.
///
/// The worker thread exits once every handle has been dropped.
#[derive(Clone)]
pub struct StorageHandle {
    jobs: mpsc::Sender<Job>,
}

impl StorageWorker {
    /// Starts the worker thread and returns the submitting handle.
    pub fn spawn(store: TileStore) -> StorageHandle {
        let (tx, rx) = mpsc::channel();
        let worker = StorageWorker { store, jobs: rx };

        thread::Builder::new()
            .name("storage-worker".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn storage worker thread");

        StorageHandle { jobs: tx }
    }

    fn run(self) {
        info!(data_dir = %self.store.data_dir().display(), "Storage worker started");

        while let Ok(job) = self.jobs.recv() {
            self.execute(job);
        }

        info!("Storage worker stopped");
    }

    fn execute(&self, job: Job) {
        match job {
            Job::Enumerate { owned, reply } => {
                let _ = reply.send(self.store.enumerate_levels(&owned));
            }
            Job::Lookup { coords, reply } => {
                let _ = reply.send(self.store.lookup(&coords));
            }
            Job::LoadPayload { entry, reply } => {
                let _ = reply.send(self.store.load_payload(&entry));
            }
            Job::Save { coord, tile, reply } => {
                let result = self.store.save(coord, &tile);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            error!(coord = %coord, error = %err, "Detached tile save failed");
                        }
                    }
                }
            }
        }
    }
}

impl StorageHandle {
    /// Returns all persisted entries for the owned levels, in index order.
    pub async fn enumerate(&self, owned: Vec<u32>) -> Result<Vec<IndexEntry>, StorageError> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Enumerate { owned, reply })?;
        Self::outcome(response.await)
    }

    /// Resolves each coord to its index entry, preserving input order.
    pub async fn lookup(
        &self,
        coords: Vec<TileCoord>,
    ) -> Result<Vec<Option<IndexEntry>>, StorageError> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Lookup { coords, reply })?;
        Self::outcome(response.await)
    }

    /// Reconstructs the payload for an index entry.
    pub async fn load_payload(&self, entry: IndexEntry) -> Result<Tile, StorageError> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::LoadPayload { entry, reply })?;
        Self::outcome(response.await)
    }

    /// Persists a tile and waits for the result.
    pub async fn save(&self, coord: TileCoord, tile: Tile) -> Result<IndexEntry, StorageError> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Save {
            coord,
            tile,
            reply: Some(reply),
        })?;
        Self::outcome(response.await)
    }

    /// Enqueues a save without waiting for completion.
    ///
    /// Failures are logged by the worker; the submitter cannot observe them.
    pub fn save_detached(&self, coord: TileCoord, tile: Tile) {
        if self
            .jobs
            .send(Job::Save {
                coord,
                tile,
                reply: None,
            })
            .is_err()
        {
            error!(coord = %coord, "Storage worker is gone; detached save dropped");
        }
    }

    fn submit(&self, job: Job) -> Result<(), StorageError> {
        self.jobs.send(job).map_err(|_| StorageError::WorkerGone)
    }

    fn outcome<T>(
        response: Result<Result<T, StoreError>, oneshot::error::RecvError>,
    ) -> Result<T, StorageError> {
        response
            .map_err(|_| StorageError::WorkerGone)?
            .map_err(StorageError::from)
    }
}

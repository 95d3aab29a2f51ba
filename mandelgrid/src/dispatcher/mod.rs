//! Worker-facing dispatcher server.
//!
//! Listens for worker connections and speaks the workload protocol: a
//! purpose byte selects between requesting a lease and returning a computed
//! tile. Each accepted connection gets its own task; the accept loop is the
//! only read not under the per-read timeout.
//!
//! When a response is accepted, the coord moves to the completed set before
//! the payload is persisted; the save is submitted to the storage worker
//! without waiting, so durability is best-effort relative to the worker. A
//! crash before the save lands simply re-issues the coord on the next run.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::coord::{TileCoord, TILE_LEN};
use crate::leaseboard::{Leaseboard, Workload};
use crate::protocol::{self, codes, ProtocolError, SocketConfig};
use crate::storage::StorageHandle;
use crate::tile::Tile;

/// Accept backlog for the worker-facing listener.
pub const LISTENER_BACKLOG: u32 = 16;

/// The worker-facing coordinator endpoint.
pub struct Dispatcher {
    board: Arc<Leaseboard>,
    storage: StorageHandle,
    socket: SocketConfig,
}

impl Dispatcher {
    /// Builds a dispatcher over the given leaseboard and storage handle.
    pub fn new(board: Arc<Leaseboard>, storage: StorageHandle, socket: SocketConfig) -> Dispatcher {
        Dispatcher {
            board,
            storage,
            socket,
        }
    }

    /// Binds the dispatcher listener.
    pub fn bind(endpoint: SocketAddr) -> std::io::Result<TcpListener> {
        protocol::bind_listener(endpoint, LISTENER_BACKLOG)
    }

    /// Runs the accept loop until shutdown is signalled.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "Dispatcher listening"),
            Err(_) => info!("Dispatcher listening"),
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer).await;
                            });
                        }
                        Err(err) => {
                            error!(error = %err, "Dispatcher accept failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        match self.converse(&mut stream).await {
            Ok(()) => {}
            Err(err) if err.is_transient() => {
                error!(%peer, error = %err, "Worker connection dropped");
            }
            Err(err) => {
                error!(%peer, error = %err, "Worker connection failed");
            }
        }
        // Dropping the stream closes the connection either way.
    }

    async fn converse(&self, stream: &mut TcpStream) -> Result<(), ProtocolError> {
        let purpose = protocol::read_u8(stream, &self.socket).await?;

        match purpose {
            codes::PURPOSE_REQUEST => self.handle_request(stream).await,
            codes::PURPOSE_RESPONSE => self.handle_response(stream).await,
            other => Err(ProtocolError::UnknownPurpose(other)),
        }
    }

    /// Hands out the next needed workload, or reports none available.
    async fn handle_request(&self, stream: &mut TcpStream) -> Result<(), ProtocolError> {
        let Some(lease) = self.board.grant_next(Instant::now()) else {
            stream.write_all(&[codes::WORKLOAD_NOT_AVAILABLE]).await?;
            info!("No workload available");
            return Ok(());
        };

        let workload = lease.workload;
        let mut message = [0u8; 17];
        message[0] = codes::WORKLOAD_AVAILABLE;
        message[1..5].copy_from_slice(&workload.coord.level.to_le_bytes());
        message[5..9].copy_from_slice(&workload.max_depth.unwrap_or_default().to_le_bytes());
        message[9..13].copy_from_slice(&workload.coord.i_real.to_le_bytes());
        message[13..17].copy_from_slice(&workload.coord.i_imag.to_le_bytes());

        if let Err(err) = stream.write_all(&message).await {
            // The worker never learned about the lease; free the coord now
            // instead of waiting out the TTL.
            self.board.retract(&lease);
            return Err(err.into());
        }

        info!(coord = %workload.coord, "Leased workload");
        Ok(())
    }

    /// Validates a returning workload and collects its payload.
    async fn handle_response(&self, stream: &mut TcpStream) -> Result<(), ProtocolError> {
        let level = protocol::read_u32(stream, &self.socket).await?;
        let max_depth = protocol::read_u32(stream, &self.socket).await?;
        let i_real = protocol::read_u32(stream, &self.socket).await?;
        let i_imag = protocol::read_u32(stream, &self.socket).await?;

        let response = Workload::new(
            TileCoord {
                level,
                i_real,
                i_imag,
            },
            Some(max_depth),
        );

        if !self.board.accept(&response, Instant::now()) {
            stream.write_all(&[codes::WORKLOAD_REJECT]).await?;
            info!(coord = %response.coord, "Rejected workload response");
            return Ok(());
        }

        stream.write_all(&[codes::WORKLOAD_ACCEPT]).await?;

        let mut payload = vec![0u8; TILE_LEN];
        protocol::read_exact(stream, &mut payload, &self.socket).await?;

        let tile = Tile::from_payload(Bytes::from(payload));
        self.storage.save_detached(response.coord, tile);

        info!(coord = %response.coord, "Accepted workload response");
        Ok(())
    }
}

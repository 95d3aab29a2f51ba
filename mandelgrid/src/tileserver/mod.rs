//! Client-facing tile server.
//!
//! Serves persisted tiles over a length-prefixed reply: a query names one
//! coord, the reply is a status byte optionally followed by the encoded
//! tile stream. Uniform tiles are synthesised and encoded on the fly, so a
//! client always receives a self-describing encoding byte regardless of how
//! the tile is stored.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::codec;
use crate::coord::TileCoord;
use crate::protocol::{self, codes, ProtocolError, SocketConfig};
use crate::storage::StorageHandle;

/// Accept backlog for the client-facing listener.
pub const LISTENER_BACKLOG: u32 = 32;

/// The client-facing tile query endpoint.
pub struct TileServer {
    storage: StorageHandle,
    socket: SocketConfig,
}

impl TileServer {
    /// Builds a tile server over the given storage handle.
    pub fn new(storage: StorageHandle, socket: SocketConfig) -> TileServer {
        TileServer { storage, socket }
    }

    /// Binds the tile-server listener.
    pub fn bind(endpoint: SocketAddr) -> std::io::Result<TcpListener> {
        protocol::bind_listener(endpoint, LISTENER_BACKLOG)
    }

    /// Runs the accept loop until shutdown is signalled.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "Tile server listening"),
            Err(_) => info!("Tile server listening"),
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Tile server shutting down");
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
                            error!(error = %err, "Tile server accept failed");
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
                error!(%peer, error = %err, "Client connection dropped");
            }
            Err(err) => {
                error!(%peer, error = %err, "Client connection failed");
            }
        }
    }

    async fn converse(&self, stream: &mut TcpStream) -> Result<(), ProtocolError> {
        let level = protocol::read_u32(stream, &self.socket).await?;
        let i_real = protocol::read_u32(stream, &self.socket).await?;
        let i_imag = protocol::read_u32(stream, &self.socket).await?;

        let coord = TileCoord {
            level,
            i_real,
            i_imag,
        };

        // Out-of-grid parameters are rejected before any index scan.
        if !coord.is_valid() {
            stream.write_all(&[codes::TILE_REJECTED]).await?;
            info!(coord = %coord, "Rejected tile query");
            return Ok(());
        }

        let entry = match self.storage.lookup(vec![coord]).await {
            Ok(mut results) => results.pop().flatten(),
            Err(err) => {
                error!(coord = %coord, error = %err, "Tile lookup failed");
                None
            }
        };

        let Some(entry) = entry else {
            stream.write_all(&[codes::TILE_NOT_AVAILABLE]).await?;
            info!(coord = %coord, "Tile not available");
            return Ok(());
        };

        let tile = match self.storage.load_payload(entry).await {
            Ok(tile) => tile,
            Err(err) => {
                error!(coord = %coord, error = %err, "Tile payload load failed");
                stream.write_all(&[codes::TILE_NOT_AVAILABLE]).await?;
                return Ok(());
            }
        };

        let encoded = codec::encode(&tile);

        stream.write_all(&[codes::TILE_ACCEPTED]).await?;
        stream
            .write_all(&(encoded.len() as u32).to_le_bytes())
            .await?;
        stream.write_all(&encoded).await?;

        info!(coord = %coord, bytes = encoded.len(), "Served tile");
        Ok(())
    }
}

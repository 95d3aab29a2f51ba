//! Wire protocol plumbing shared by both servers.
//!
//! Messages are not framed: each side reads exactly the number of bytes the
//! protocol state machine dictates, all integers little-endian. This module
//! holds the code bytes, the per-read timeout discipline, and the listener
//! construction with an explicit backlog.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpSocket};

use crate::config::DEFAULT_READ_TIMEOUT;

/// Protocol code bytes.
pub mod codes {
    /// Worker connection purpose: asking for a workload.
    pub const PURPOSE_REQUEST: u8 = 0x00;
    /// Worker connection purpose: returning a computed workload.
    pub const PURPOSE_RESPONSE: u8 = 0x01;

    /// A workload follows.
    pub const WORKLOAD_AVAILABLE: u8 = 0x10;
    /// No workload is currently needed.
    pub const WORKLOAD_NOT_AVAILABLE: u8 = 0x11;

    /// The returned workload matches a live lease; payload expected.
    pub const WORKLOAD_ACCEPT: u8 = 0x20;
    /// The returned workload matches no live lease.
    pub const WORKLOAD_REJECT: u8 = 0x21;

    /// Tile query hit; length-prefixed encoded tile follows.
    pub const TILE_ACCEPTED: u8 = 0x00;
    /// Tile query parameters are invalid.
    pub const TILE_REJECTED: u8 = 0x01;
    /// Tile is not persisted or could not be read.
    pub const TILE_NOT_AVAILABLE: u8 = 0x02;
}

/// Per-connection socket discipline.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Apply `read_timeout` to every read.
    pub timeout_enabled: bool,
    /// Budget for one read call.
    pub read_timeout: Duration,
}

impl SocketConfig {
    /// Default read timeout, toggled by configuration.
    pub fn new(timeout_enabled: bool) -> SocketConfig {
        SocketConfig {
            timeout_enabled,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig::new(true)
    }
}

/// Errors raised while conversing on one connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A read exceeded the per-read timeout
    #[error("read timed out")]
    Timeout,

    /// The peer closed the connection mid-message
    #[error("connection closed mid-message")]
    UnexpectedEof,

    /// The peer opened with an unknown purpose byte
    #[error("unknown connection purpose 0x{0:02x}")]
    UnknownPurpose(u8),

    /// Underlying socket failure
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Transient socket conditions: the connection is dropped and the
    /// listener carries on.
    pub fn is_transient(&self) -> bool {
        match self {
            ProtocolError::Timeout => true,
            ProtocolError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Binds a listener with an explicit accept backlog.
pub fn bind_listener(endpoint: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if endpoint.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    #[cfg(not(windows))]
    socket.set_reuseaddr(true)?;

    socket.bind(endpoint)?;
    socket.listen(backlog)
}

/// Fills `buf` from the stream, applying the per-read timeout to each
/// underlying read (a slow trickle that keeps delivering bytes stays within
/// budget; a stalled peer does not).
pub async fn read_exact<S>(
    stream: &mut S,
    buf: &mut [u8],
    socket: &SocketConfig,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;

    while filled < buf.len() {
        let n = if socket.timeout_enabled {
            match tokio::time::timeout(socket.read_timeout, stream.read(&mut buf[filled..])).await
            {
                Ok(read) => read?,
                Err(_) => return Err(ProtocolError::Timeout),
            }
        } else {
            stream.read(&mut buf[filled..]).await?
        };

        if n == 0 {
            return Err(ProtocolError::UnexpectedEof);
        }
        filled += n;
    }

    Ok(())
}

/// Reads one code byte.
pub async fn read_u8<S>(stream: &mut S, socket: &SocketConfig) -> Result<u8, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    read_exact(stream, &mut byte, socket).await?;
    Ok(byte[0])
}

/// Reads one little-endian `u32`.
pub async fn read_u32<S>(stream: &mut S, socket: &SocketConfig) -> Result<u32, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut word = [0u8; 4];
    read_exact(stream, &mut word, socket).await?;
    Ok(u32::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn quick_timeout() -> SocketConfig {
        SocketConfig {
            timeout_enabled: true,
            read_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_read_u32_little_endian() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x10, 0x27, 0x00, 0x00]).await.unwrap();

        let value = read_u32(&mut server, &quick_timeout()).await.unwrap();
        assert_eq!(value, 10_000);
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);

        let err = read_u8(&mut server, &quick_timeout()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_disabled_timeout_waits_for_data() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let socket = SocketConfig::new(false);

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            client.write_all(&[0x42]).await.unwrap();
            client
        });

        let byte = read_u8(&mut server, &socket).await.unwrap();
        assert_eq!(byte, 0x42);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_trickled_delivery_stays_within_budget() {
        let (mut client, mut server) = tokio::io::duplex(4);
        let socket = quick_timeout();

        let writer = tokio::spawn(async move {
            for chunk in [[0u8; 4], [1u8; 4]] {
                client.write_all(&chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            client
        });

        // Each chunk arrives inside the 50 ms budget even though the whole
        // message takes longer.
        let mut buf = [0u8; 8];
        read_exact(&mut server, &mut buf, &socket).await.unwrap();
        assert_eq!(&buf[4..], &[1u8; 4]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_peer_is_unexpected_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_u8(&mut server, &quick_timeout()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_bind_listener_reports_local_addr() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}

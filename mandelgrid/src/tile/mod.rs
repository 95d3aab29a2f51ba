//! Tile payload and category classification
//!
//! A tile payload is a fixed-size buffer of `TILE_SIDE × TILE_SIDE`
//! iteration-count bytes produced by a worker. The coordinator treats the
//! bytes opaquely apart from classifying uniform tiles, which are persisted
//! without a data file.

use bytes::Bytes;

use crate::coord::TILE_LEN;

/// Derived classification of a tile's bytes.
///
/// Uniform tiles get a compact representation in the store: the index entry
/// alone is enough to reconstruct them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// At least two distinct byte values (or a uniform value other than 0/1)
    Regular,
    /// Every byte is `0x00`
    AllZero,
    /// Every byte is `0x01`
    AllOne,
}

impl Category {
    /// Classifies a payload.
    pub fn of(payload: &[u8]) -> Category {
        match payload.first() {
            Some(0x00) if payload.iter().all(|&b| b == 0x00) => Category::AllZero,
            Some(0x01) if payload.iter().all(|&b| b == 0x01) => Category::AllOne,
            _ => Category::Regular,
        }
    }
}

/// One tile's payload, always exactly [`TILE_LEN`] bytes.
///
/// Backed by [`Bytes`] so clones and hand-offs between the network handlers
/// and the storage worker never copy the 16 MiB buffer.
#[derive(Debug, Clone)]
pub struct Tile {
    payload: Bytes,
}

impl Tile {
    /// Wraps a payload buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not exactly [`TILE_LEN`] bytes; callers are
    /// expected to have read or synthesised a full tile.
    pub fn from_payload(payload: Bytes) -> Tile {
        assert_eq!(
            payload.len(),
            TILE_LEN,
            "tile payload must be exactly {} bytes, got {}",
            TILE_LEN,
            payload.len()
        );
        Tile { payload }
    }

    /// Synthesises a tile whose every byte is `value`.
    pub fn uniform(value: u8) -> Tile {
        Tile {
            payload: Bytes::from(vec![value; TILE_LEN]),
        }
    }

    /// The payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Classifies this tile's payload.
    pub fn category(&self) -> Category {
        Category::of(&self.payload)
    }
}

//! Tile payload serialization
//!
//! Encodes a tile to a self-describing byte stream: one leading code byte
//! identifying the encoding, followed by the encoding's body.
//!
//! Two encodings exist:
//! - **Raw** (`0x00`): the payload verbatim.
//! - **RLE** (`0x01`): `(length: u32 LE, value: u8)` runs until the payload
//!   length is reached.
//!
//! The encoder measures the output length of every known encoding and emits
//! the shortest, ties broken by code ascending. Uniform and banded tiles
//! shrink from ~16 MiB to a handful of bytes; high-entropy tiles pay exactly
//! one byte of overhead under Raw.

use bytes::Bytes;
use thiserror::Error;

use crate::coord::TILE_LEN;
use crate::tile::Tile;

/// Code byte for the raw encoding.
pub const RAW_CODE: u8 = 0x00;

/// Code byte for the run-length encoding.
pub const RLE_CODE: u8 = 0x01;

/// Bytes per RLE run: a `u32` length plus a value byte.
const RUN_SIZE: usize = 5;

/// Errors that can occur decoding a tile stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Unknown leading code byte
    #[error("unknown encoding code byte 0x{0:02x}")]
    BadEncoding(u8),

    /// The stream ended before the payload was complete
    #[error("encoded stream is truncated")]
    TruncatedStream,

    /// The decoded body does not produce exactly one tile payload
    #[error("decoded length does not match the tile payload length")]
    LengthMismatch,
}

/// Encodes a tile, selecting the shortest known encoding.
pub fn encode(tile: &Tile) -> Vec<u8> {
    let payload = tile.payload();

    // Raw is 1 + TILE_LEN; RLE is 1 + 5 bytes per run. Raw wins ties via its
    // lower code byte.
    let raw_len = 1 + TILE_LEN;
    let rle_len = 1 + RUN_SIZE * count_runs(payload);

    if rle_len < raw_len {
        encode_rle(payload, rle_len)
    } else {
        let mut out = Vec::with_capacity(raw_len);
        out.push(RAW_CODE);
        out.extend_from_slice(payload);
        out
    }
}

/// Length in bytes of [`encode`]'s output for this tile, without encoding.
pub fn encoded_len(tile: &Tile) -> usize {
    let raw_len = 1 + TILE_LEN;
    let rle_len = 1 + RUN_SIZE * count_runs(tile.payload());
    rle_len.min(raw_len)
}

/// Decodes a self-describing tile stream.
pub fn decode(bytes: &[u8]) -> Result<Tile, CodecError> {
    let (&code, body) = bytes.split_first().ok_or(CodecError::TruncatedStream)?;

    let payload = match code {
        RAW_CODE => decode_raw(body)?,
        RLE_CODE => decode_rle(body)?,
        other => return Err(CodecError::BadEncoding(other)),
    };

    Ok(Tile::from_payload(payload))
}

fn count_runs(payload: &[u8]) -> usize {
    let mut runs = 0;
    let mut previous = None;

    for &byte in payload {
        if previous != Some(byte) {
            runs += 1;
            previous = Some(byte);
        }
    }

    runs
}

fn encode_rle(payload: &[u8], capacity: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(capacity);
    out.push(RLE_CODE);

    let mut iter = payload.iter();
    let Some(&first) = iter.next() else {
        return out;
    };

    let mut value = first;
    let mut length: u32 = 1;

    for &byte in iter {
        if byte == value {
            length += 1;
        } else {
            out.extend_from_slice(&length.to_le_bytes());
            out.push(value);
            value = byte;
            length = 1;
        }
    }

    out.extend_from_slice(&length.to_le_bytes());
    out.push(value);
    out
}

fn decode_raw(body: &[u8]) -> Result<Bytes, CodecError> {
    match body.len() {
        n if n < TILE_LEN => Err(CodecError::TruncatedStream),
        n if n > TILE_LEN => Err(CodecError::LengthMismatch),
        _ => Ok(Bytes::copy_from_slice(body)),
    }
}

fn decode_rle(body: &[u8]) -> Result<Bytes, CodecError> {
    let mut out = Vec::with_capacity(TILE_LEN);
    let mut offset = 0;

    while out.len() < TILE_LEN {
        let run = body
            .get(offset..offset + RUN_SIZE)
            .ok_or(CodecError::TruncatedStream)?;
        offset += RUN_SIZE;

        let length = u32::from_le_bytes([run[0], run[1], run[2], run[3]]) as usize;
        let value = run[4];

        if length == 0 || out.len() + length > TILE_LEN {
            return Err(CodecError::LengthMismatch);
        }

        out.resize(out.len() + length, value);
    }

    // Runs past the full payload overshoot the tile.
    if offset != body.len() {
        return Err(CodecError::LengthMismatch);
    }

    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TILE_SIDE;

    fn regular_tile() -> Tile {
        let mut payload = vec![0u8; TILE_LEN];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        Tile::from_payload(Bytes::from(payload))
    }

    fn banded_tile() -> Tile {
        // One value per row: 4096 runs of 4096 bytes.
        let mut payload = vec![0u8; TILE_LEN];
        for (row, chunk) in payload.chunks_mut(TILE_SIDE).enumerate() {
            chunk.fill((row % 200) as u8);
        }
        Tile::from_payload(Bytes::from(payload))
    }

    #[test]
    fn test_uniform_tile_encodes_to_one_run() {
        let encoded = encode(&Tile::uniform(0x01));

        let expected_length = (TILE_LEN as u32).to_le_bytes();
        assert_eq!(
            encoded,
            vec![
                RLE_CODE,
                expected_length[0],
                expected_length[1],
                expected_length[2],
                expected_length[3],
                0x01,
            ]
        );
    }

    #[test]
    fn test_high_entropy_tile_falls_back_to_raw() {
        let tile = regular_tile();
        let encoded = encode(&tile);

        assert_eq!(encoded[0], RAW_CODE);
        assert_eq!(encoded.len(), 1 + TILE_LEN);
    }

    #[test]
    fn test_banded_tile_prefers_rle() {
        let tile = banded_tile();
        let encoded = encode(&tile);

        assert_eq!(encoded[0], RLE_CODE);
        assert_eq!(encoded.len(), 1 + RUN_SIZE * TILE_SIDE);
    }

    #[test]
    fn test_round_trip_raw() {
        let tile = regular_tile();
        let decoded = decode(&encode(&tile)).unwrap();
        assert_eq!(decoded.payload(), tile.payload());
    }

    #[test]
    fn test_round_trip_rle() {
        let tile = banded_tile();
        let decoded = decode(&encode(&tile)).unwrap();
        assert_eq!(decoded.payload(), tile.payload());
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        for tile in [Tile::uniform(0x00), banded_tile(), regular_tile()] {
            assert_eq!(encoded_len(&tile), encode(&tile).len());
        }
    }

    #[test]
    fn test_encoder_output_never_beats_shortest_by_more_than_code_byte() {
        let tile = regular_tile();
        assert!(encoded_len(&tile) <= 1 + TILE_LEN);
    }

    #[test]
    fn test_decode_empty_stream() {
        assert_eq!(decode(&[]).unwrap_err(), CodecError::TruncatedStream);
    }

    #[test]
    fn test_decode_unknown_code() {
        assert_eq!(decode(&[0x7f]).unwrap_err(), CodecError::BadEncoding(0x7f));
    }

    #[test]
    fn test_decode_truncated_raw() {
        let stream = [RAW_CODE, 0x01, 0x02];
        assert_eq!(decode(&stream).unwrap_err(), CodecError::TruncatedStream);
    }

    #[test]
    fn test_decode_truncated_rle_run() {
        // Full first run, then a dangling 2-byte fragment.
        let mut stream = vec![RLE_CODE];
        stream.extend_from_slice(&1000u32.to_le_bytes());
        stream.push(0x01);
        stream.extend_from_slice(&[0x00, 0x01]);
        assert_eq!(decode(&stream).unwrap_err(), CodecError::TruncatedStream);
    }

    #[test]
    fn test_decode_zero_length_run() {
        let mut stream = vec![RLE_CODE];
        stream.extend_from_slice(&0u32.to_le_bytes());
        stream.push(0x01);
        assert_eq!(decode(&stream).unwrap_err(), CodecError::LengthMismatch);
    }

    #[test]
    fn test_decode_overshooting_run() {
        let mut stream = vec![RLE_CODE];
        stream.extend_from_slice(&((TILE_LEN as u32) + 1).to_le_bytes());
        stream.push(0x01);
        assert_eq!(decode(&stream).unwrap_err(), CodecError::LengthMismatch);
    }

    #[test]
    fn test_decode_trailing_run_after_full_payload() {
        let mut stream = vec![RLE_CODE];
        stream.extend_from_slice(&(TILE_LEN as u32).to_le_bytes());
        stream.push(0x01);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.push(0x02);
        assert_eq!(decode(&stream).unwrap_err(), CodecError::LengthMismatch);
    }

    #[test]
    fn test_decode_oversized_raw_body() {
        let mut stream = vec![RAW_CODE];
        stream.extend_from_slice(&vec![0u8; TILE_LEN + 1]);
        assert_eq!(decode(&stream).unwrap_err(), CodecError::LengthMismatch);
    }
}

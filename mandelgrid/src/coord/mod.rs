//! Tile coordinate module
//!
//! Defines the `(level, i_real, i_imag)` triple identifying one tile and the
//! uniform mapping between the level grid and the complex plane
//! `[-2, 2] × [-2, 2]i`.

mod types;

pub use types::{CoordError, TileCoord, MAX_AXIS, MIN_AXIS, TILE_LEN, TILE_SIDE};

/// Constructs a validated tile coordinate.
///
/// # Arguments
///
/// * `level` - Grid dimension (at least 1)
/// * `i_real` - Real-axis index (`< level`)
/// * `i_imag` - Imaginary-axis index (`< level`)
///
/// # Returns
///
/// A `Result` containing the coordinate or an error when either index is
/// outside the level grid.
#[inline]
pub fn tile_coord(level: u32, i_real: u32, i_imag: u32) -> Result<TileCoord, CoordError> {
    if level == 0 {
        return Err(CoordError::ZeroLevel);
    }
    if i_real >= level {
        return Err(CoordError::RealIndexOutOfRange { level, i_real });
    }
    if i_imag >= level {
        return Err(CoordError::ImagIndexOutOfRange { level, i_imag });
    }

    Ok(TileCoord {
        level,
        i_real,
        i_imag,
    })
}

/// Per-axis extent of one tile at the given level.
#[inline]
pub fn tile_extent(level: u32) -> f64 {
    (MAX_AXIS - MIN_AXIS) / level as f64
}

/// Complex-plane origin of a tile.
///
/// Returns the `(real, imaginary)` components of the tile's lower-left
/// corner; the tile covers a square of side [`tile_extent`] from there.
#[inline]
pub fn tile_origin(coord: &TileCoord) -> (f64, f64) {
    let extent = tile_extent(coord.level);

    let real = MIN_AXIS + coord.i_real as f64 * extent;
    let imag = MIN_AXIS + coord.i_imag as f64 * extent;

    (real, imag)
}

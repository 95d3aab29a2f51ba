//! Tile coordinate type definitions

use std::fmt;

/// Side length of a tile in samples.
pub const TILE_SIDE: usize = 4096;

/// Number of payload bytes in one tile (`TILE_SIDE` squared).
pub const TILE_LEN: usize = TILE_SIDE * TILE_SIDE;

/// Lower bound of both complex-plane axes.
pub const MIN_AXIS: f64 = -2.0;

/// Upper bound of both complex-plane axes.
pub const MAX_AXIS: f64 = 2.0;

/// Coordinates of one tile in the level grid.
///
/// A level-`L` image is an `L × L` grid of tiles covering the square
/// `[-2, 2] × [-2, 2]i` of the complex plane. Valid tiles satisfy
/// `i_real < level` and `i_imag < level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Grid dimension this tile belongs to.
    pub level: u32,
    /// Index along the real axis, 0 at the left edge.
    pub i_real: u32,
    /// Index along the imaginary axis, 0 at the bottom edge.
    pub i_imag: u32,
}

impl TileCoord {
    /// Returns true when both indices are inside the level grid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.i_real < self.level && self.i_imag < self.level
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.level, self.i_real, self.i_imag)
    }
}

/// Errors that can occur constructing a tile coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// The level is zero; a zero-level grid has no tiles
    ZeroLevel,
    /// The real-axis index is outside the level grid
    RealIndexOutOfRange { level: u32, i_real: u32 },
    /// The imaginary-axis index is outside the level grid
    ImagIndexOutOfRange { level: u32, i_imag: u32 },
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::ZeroLevel => write!(f, "level must be at least 1"),
            CoordError::RealIndexOutOfRange { level, i_real } => {
                write!(
                    f,
                    "Real-axis index {} out of range for level {}",
                    i_real, level
                )
            }
            CoordError::ImagIndexOutOfRange { level, i_imag } => {
                write!(
                    f,
                    "Imaginary-axis index {} out of range for level {}",
                    i_imag, level
                )
            }
        }
    }
}

impl std::error::Error for CoordError {}

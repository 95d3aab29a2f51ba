//! Index record format.
//!
//! One record per persisted tile, little-endian, bit-exact:
//!
//! ```text
//! level:u32  i_real:u32  i_imag:u32  category:u32
//! [ if category == Regular:  name_len:i32  name:ASCII[name_len] ]
//! ```
//!
//! `category` is encoded as `0 = Regular, 1 = AllZero, 2 = AllOne`. The
//! filename is present only for `Regular` entries; uniform tiles are
//! reconstructed from the category alone.

use std::io::{self, Read, Write};

use crate::coord::TileCoord;
use crate::tile::Category;

use super::StoreError;

/// One persisted-tile record from the index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Coordinates of the persisted tile.
    pub coord: TileCoord,
    /// Tile classification at save time.
    pub category: Category,
    /// Data filename, present only for `Regular` entries.
    pub filename: Option<String>,
}

pub(crate) fn category_code(category: Category) -> u32 {
    match category {
        Category::Regular => 0,
        Category::AllZero => 1,
        Category::AllOne => 2,
    }
}

pub(crate) fn category_from_code(code: u32) -> Option<Category> {
    match code {
        0 => Some(Category::Regular),
        1 => Some(Category::AllZero),
        2 => Some(Category::AllOne),
        _ => None,
    }
}

/// Appends one record to `writer`.
pub(crate) fn write_record<W: Write>(writer: &mut W, entry: &IndexEntry) -> io::Result<()> {
    writer.write_all(&entry.coord.level.to_le_bytes())?;
    writer.write_all(&entry.coord.i_real.to_le_bytes())?;
    writer.write_all(&entry.coord.i_imag.to_le_bytes())?;
    writer.write_all(&category_code(entry.category).to_le_bytes())?;

    if entry.category == Category::Regular {
        let name = entry
            .filename
            .as_deref()
            .expect("Regular index entry written without a data filename");
        writer.write_all(&(name.len() as i32).to_le_bytes())?;
        writer.write_all(name.as_bytes())?;
    }

    Ok(())
}

/// Reads the next record, or `None` at a clean end of file.
///
/// A stream that ends inside a record is a corrupt index.
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<Option<IndexEntry>, StoreError> {
    let mut field = [0u8; 4];

    if !read_field(reader, &mut field, true)? {
        return Ok(None);
    }
    let level = u32::from_le_bytes(field);

    read_field(reader, &mut field, false)?;
    let i_real = u32::from_le_bytes(field);

    read_field(reader, &mut field, false)?;
    let i_imag = u32::from_le_bytes(field);

    read_field(reader, &mut field, false)?;
    let code = u32::from_le_bytes(field);
    let category = category_from_code(code).ok_or_else(|| StoreError::CorruptIndex {
        reason: format!("unknown category code {}", code),
    })?;

    let filename = if category == Category::Regular {
        read_field(reader, &mut field, false)?;
        let name_len = i32::from_le_bytes(field);
        if name_len < 0 {
            return Err(StoreError::CorruptIndex {
                reason: format!("negative filename length {}", name_len),
            });
        }

        let mut name = vec![0u8; name_len as usize];
        read_field(reader, &mut name, false)?;
        if !name.is_ascii() {
            return Err(StoreError::CorruptIndex {
                reason: "data filename is not ASCII".to_string(),
            });
        }

        // is_ascii above makes this infallible.
        Some(String::from_utf8_lossy(&name).into_owned())
    } else {
        None
    };

    Ok(Some(IndexEntry {
        coord: TileCoord {
            level,
            i_real,
            i_imag,
        },
        category,
        filename,
    }))
}

/// Fills `buf` from `reader`.
///
/// Returns `Ok(false)` when the stream ends before the first byte and
/// `eof_allowed` is set; ending anywhere else inside the buffer is a
/// truncated record.
fn read_field<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    eof_allowed: bool,
) -> Result<bool, StoreError> {
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).map_err(StoreError::from)?;
        if n == 0 {
            if filled == 0 && eof_allowed {
                return Ok(false);
            }
            return Err(StoreError::CorruptIndex {
                reason: "index file ends inside a record".to_string(),
            });
        }
        filled += n;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn regular_entry() -> IndexEntry {
        IndexEntry {
            coord: TileCoord {
                level: 4,
                i_real: 1,
                i_imag: 2,
            },
            category: Category::Regular,
            filename: Some("4;1;2".to_string()),
        }
    }

    #[test]
    fn test_regular_record_layout() {
        let mut bytes = Vec::new();
        write_record(&mut bytes, &regular_entry()).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&0u32.to_le_bytes());
        expected.extend_from_slice(&5i32.to_le_bytes());
        expected.extend_from_slice(b"4;1;2");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_uniform_record_has_no_filename() {
        let entry = IndexEntry {
            coord: TileCoord {
                level: 2,
                i_real: 0,
                i_imag: 0,
            },
            category: Category::AllZero,
            filename: None,
        };

        let mut bytes = Vec::new();
        write_record(&mut bytes, &entry).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
    }

    #[test]
    fn test_round_trip() {
        let entries = vec![
            regular_entry(),
            IndexEntry {
                coord: TileCoord {
                    level: 2,
                    i_real: 1,
                    i_imag: 1,
                },
                category: Category::AllOne,
                filename: None,
            },
        ];

        let mut bytes = Vec::new();
        for entry in &entries {
            write_record(&mut bytes, entry).unwrap();
        }

        let mut reader = Cursor::new(bytes);
        let mut decoded = Vec::new();
        while let Some(entry) = read_record(&mut reader).unwrap() {
            decoded.push(entry);
        }
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_empty_stream_is_clean_eof() {
        let mut reader = Cursor::new(Vec::new());
        assert_eq!(read_record(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let mut bytes = Vec::new();
        write_record(&mut bytes, &regular_entry()).unwrap();
        bytes.truncate(10);

        let mut reader = Cursor::new(bytes);
        let err = read_record(&mut reader).unwrap_err();
        assert!(matches!(err, StoreError::CorruptIndex { .. }));
    }

    #[test]
    fn test_unknown_category_is_corrupt() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&9u32.to_le_bytes());

        let mut reader = Cursor::new(bytes);
        let err = read_record(&mut reader).unwrap_err();
        assert!(matches!(err, StoreError::CorruptIndex { .. }));
    }

    #[test]
    fn test_negative_filename_length_is_corrupt() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&(-1i32).to_le_bytes());

        let mut reader = Cursor::new(bytes);
        let err = read_record(&mut reader).unwrap_err();
        assert!(matches!(err, StoreError::CorruptIndex { .. }));
    }
}

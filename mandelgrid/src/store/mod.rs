//! Persistent tile storage.
//!
//! The store owns one directory holding an append-only index file
//! (`_index.dat`) and one data file per `Regular` tile. Uniform tiles are
//! recorded in the index alone and synthesised on load. The save order is
//! data file first, index record second: a crash between the two leaves an
//! orphan data file, which later enumerations simply never reference, rather
//! than an index entry pointing at nothing.
//!
//! The index file is guarded by a process-wide exclusive lock held for the
//! whole of each read or append; the storage worker serialises access
//! in-process, so the lock matters for out-of-process readers. Data files
//! are guarded by a shared set of filenames in use.

mod index;
mod locks;

pub use index::IndexEntry;

use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::codec::{self, CodecError};
use crate::coord::TileCoord;
use crate::tile::{Category, Tile};

use locks::{open_with_retry, FilenameSet};

/// Name of the index file inside the data directory.
pub const INDEX_FILE_NAME: &str = "_index.dat";

/// Name of the data directory created under the configured parent.
pub const DATA_DIR_NAME: &str = "mandelgrid_data";

/// Errors that can occur in the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// The index file fails to parse
    #[error("corrupt index: {reason}")]
    CorruptIndex { reason: String },

    /// A `Regular` index entry carries no data filename
    #[error("index entry for tile {coord} names no data file")]
    MissingFilename { coord: TileCoord },

    /// A data file's encoded stream fails to decode
    #[error("data file '{filename}' is corrupt: {source}")]
    CorruptData {
        filename: String,
        #[source]
        source: CodecError,
    },
}

/// Append-only tile store over one data directory.
///
/// Callers never touch the index file or data files directly; every
/// operation goes through the store, which owns the path layout and the
/// per-file exclusion.
#[derive(Debug)]
pub struct TileStore {
    data_dir: PathBuf,
    index_path: PathBuf,
    index_lock: Mutex<()>,
    in_use: Arc<FilenameSet>,
}

impl TileStore {
    /// Opens the store under `parent`, bootstrapping the data directory and
    /// an empty index file when missing.
    pub fn open(parent: &Path) -> Result<TileStore, StoreError> {
        let data_dir = parent.join(DATA_DIR_NAME);
        fs::create_dir_all(&data_dir)?;

        let index_path = data_dir.join(INDEX_FILE_NAME);
        if !index_path.exists() {
            debug!(path = %index_path.display(), "Creating empty tile index");
        }
        open_with_retry(OpenOptions::new().write(true).create(true), &index_path)?;

        Ok(TileStore {
            data_dir,
            index_path,
            index_lock: Mutex::new(()),
            in_use: Arc::new(FilenameSet::default()),
        })
    }

    /// The directory holding the index and data files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reads every index entry whose level is in `owned`, in index order.
    ///
    /// Fails with [`StoreError::CorruptIndex`] on a truncated or
    /// unparseable record.
    pub fn enumerate_levels(&self, owned: &[u32]) -> Result<Vec<IndexEntry>, StoreError> {
        let _guard = self.lock_index();
        let mut reader = self.open_index_reader()?;

        let mut entries = Vec::new();
        while let Some(entry) = index::read_record(&mut reader)? {
            if owned.contains(&entry.coord.level) {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    /// Resolves each coord to its first matching index entry, preserving
    /// input order. Scans the index once and stops early once every coord
    /// is resolved.
    pub fn lookup(&self, coords: &[TileCoord]) -> Result<Vec<Option<IndexEntry>>, StoreError> {
        let _guard = self.lock_index();
        let mut reader = self.open_index_reader()?;

        let mut results: Vec<Option<IndexEntry>> = vec![None; coords.len()];
        let mut unresolved = coords.len();

        while unresolved > 0 {
            let Some(entry) = index::read_record(&mut reader)? else {
                break;
            };

            for (slot, coord) in results.iter_mut().zip(coords) {
                if slot.is_none() && *coord == entry.coord {
                    *slot = Some(entry.clone());
                    unresolved -= 1;
                }
            }
        }

        Ok(results)
    }

    /// Resolves a single coord to its index entry, if persisted.
    pub fn load_entry(&self, coord: TileCoord) -> Result<Option<IndexEntry>, StoreError> {
        Ok(self.lookup(&[coord])?.pop().flatten())
    }

    /// Persists a tile: data file first (for `Regular` tiles), index record
    /// second.
    pub fn save(&self, coord: TileCoord, tile: &Tile) -> Result<IndexEntry, StoreError> {
        let category = tile.category();

        let filename = if category == Category::Regular {
            Some(self.write_data_file(coord, tile)?)
        } else {
            None
        };

        let entry = IndexEntry {
            coord,
            category,
            filename,
        };

        self.append_record(&entry)?;
        debug!(coord = %coord, category = ?category, "Persisted tile");
        Ok(entry)
    }

    /// Reconstructs the payload for an index entry.
    ///
    /// Uniform categories are synthesised without touching the filesystem;
    /// `Regular` entries read and decode their data file.
    pub fn load_payload(&self, entry: &IndexEntry) -> Result<Tile, StoreError> {
        match entry.category {
            Category::AllZero => Ok(Tile::uniform(0x00)),
            Category::AllOne => Ok(Tile::uniform(0x01)),
            Category::Regular => {
                let filename =
                    entry
                        .filename
                        .as_deref()
                        .ok_or(StoreError::MissingFilename {
                            coord: entry.coord,
                        })?;

                let _claim = self.in_use.acquire(filename);

                let file = open_with_retry(
                    OpenOptions::new().read(true),
                    &self.data_dir.join(filename),
                )?;
                let mut encoded = Vec::new();
                BufReader::new(file).read_to_end(&mut encoded)?;

                codec::decode(&encoded).map_err(|source| StoreError::CorruptData {
                    filename: filename.to_string(),
                    source,
                })
            }
        }
    }

    fn write_data_file(&self, coord: TileCoord, tile: &Tile) -> Result<String, StoreError> {
        let (filename, _claim) = self.claim_fresh_filename(coord);

        let file = open_with_retry(
            OpenOptions::new().write(true).create(true).truncate(true),
            &self.data_dir.join(&filename),
        )?;

        let mut writer = BufWriter::new(file);
        writer.write_all(&codec::encode(tile))?;
        writer.flush()?;

        Ok(filename)
    }

    /// Picks a data filename that is unique in the directory, claiming it in
    /// the in-use set for the duration of the write.
    ///
    /// The base name is `"{level};{i_real};{i_imag}"`; the base is tried
    /// once, after which suffixes `0, 1, 2, …` are appended until a free
    /// name is found.
    fn claim_fresh_filename(&self, coord: TileCoord) -> (String, locks::FilenameGuard) {
        let base = format!("{};{};{}", coord.level, coord.i_real, coord.i_imag);

        let mut candidate = base.clone();
        let mut suffix: u64 = 0;

        loop {
            let claim = self.in_use.acquire(&candidate);
            if !self.data_dir.join(&candidate).exists() {
                return (candidate, claim);
            }
            drop(claim);

            candidate = format!("{}{}", base, suffix);
            suffix += 1;
        }
    }

    fn append_record(&self, entry: &IndexEntry) -> Result<(), StoreError> {
        let _guard = self.lock_index();

        let file = open_with_retry(
            OpenOptions::new().append(true).create(true),
            &self.index_path,
        )?;
        let mut writer = BufWriter::new(file);
        index::write_record(&mut writer, entry)?;
        writer.flush()?;

        Ok(())
    }

    fn open_index_reader(&self) -> Result<BufReader<fs::File>, StoreError> {
        let file = open_with_retry(OpenOptions::new().read(true), &self.index_path)?;
        Ok(BufReader::new(file))
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, ()> {
        // Lock poisoning only happens if a holder panicked; the index itself
        // is still append-consistent, so keep going.
        self.index_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TILE_LEN;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn regular_tile() -> Tile {
        let mut payload = vec![0u8; TILE_LEN];
        payload[0] = 0x42;
        payload[TILE_LEN - 1] = 0x17;
        Tile::from_payload(Bytes::from(payload))
    }

    fn coord(level: u32, i_real: u32, i_imag: u32) -> TileCoord {
        TileCoord {
            level,
            i_real,
            i_imag,
        }
    }

    #[test]
    fn test_open_bootstraps_directory_and_index() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        assert!(store.data_dir().is_dir());
        assert!(store.data_dir().join(INDEX_FILE_NAME).is_file());
        assert!(store.enumerate_levels(&[1, 2, 3]).unwrap().is_empty());
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        store.save(coord(2, 0, 0), &Tile::uniform(0x00)).unwrap();
        drop(store);

        let store = TileStore::open(dir.path()).unwrap();
        assert_eq!(store.enumerate_levels(&[2]).unwrap().len(), 1);
    }

    #[test]
    fn test_save_uniform_writes_no_data_file() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        let entry = store.save(coord(2, 0, 0), &Tile::uniform(0x00)).unwrap();
        assert_eq!(entry.category, Category::AllZero);
        assert_eq!(entry.filename, None);

        // Only the index file is in the directory.
        let names: Vec<_> = fs::read_dir(store.data_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![INDEX_FILE_NAME.to_string()]);
    }

    #[test]
    fn test_save_regular_writes_decodable_data_file() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let tile = regular_tile();

        let entry = store.save(coord(4, 1, 2), &tile).unwrap();
        assert_eq!(entry.filename.as_deref(), Some("4;1;2"));

        let loaded = store.load_payload(&entry).unwrap();
        assert_eq!(loaded.payload(), tile.payload());
    }

    #[test]
    fn test_first_collision_takes_suffix_zero() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let tile = regular_tile();

        let first = store.save(coord(4, 1, 2), &tile).unwrap();
        let second = store.save(coord(4, 1, 2), &tile).unwrap();
        let third = store.save(coord(4, 1, 2), &tile).unwrap();

        assert_eq!(first.filename.as_deref(), Some("4;1;2"));
        assert_eq!(second.filename.as_deref(), Some("4;1;20"));
        assert_eq!(third.filename.as_deref(), Some("4;1;21"));
    }

    #[test]
    fn test_enumerate_filters_by_level_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        store.save(coord(2, 0, 0), &Tile::uniform(0x00)).unwrap();
        store.save(coord(3, 1, 1), &Tile::uniform(0x01)).unwrap();
        store.save(coord(2, 0, 1), &Tile::uniform(0x01)).unwrap();

        let entries = store.enumerate_levels(&[2]).unwrap();
        let coords: Vec<_> = entries.iter().map(|e| e.coord).collect();
        assert_eq!(coords, vec![coord(2, 0, 0), coord(2, 0, 1)]);
    }

    #[test]
    fn test_lookup_preserves_input_order() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        store.save(coord(2, 0, 0), &Tile::uniform(0x00)).unwrap();
        store.save(coord(2, 1, 1), &Tile::uniform(0x01)).unwrap();

        let results = store
            .lookup(&[coord(2, 1, 1), coord(2, 0, 1), coord(2, 0, 0)])
            .unwrap();

        assert_eq!(results[0].as_ref().unwrap().coord, coord(2, 1, 1));
        assert_eq!(results[1], None);
        assert_eq!(results[2].as_ref().unwrap().coord, coord(2, 0, 0));
    }

    #[test]
    fn test_load_entry_miss_is_none() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        assert_eq!(store.load_entry(coord(2, 0, 0)).unwrap(), None);
    }

    #[test]
    fn test_uniform_payloads_synthesise_without_files() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        let zero = store.save(coord(2, 0, 0), &Tile::uniform(0x00)).unwrap();
        let one = store.save(coord(2, 0, 1), &Tile::uniform(0x01)).unwrap();

        assert_eq!(store.load_payload(&zero).unwrap().category(), Category::AllZero);
        assert_eq!(store.load_payload(&one).unwrap().category(), Category::AllOne);
    }

    #[test]
    fn test_orphan_data_file_is_invisible_to_enumerate() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        // Simulates a crash between data-file write and index append.
        fs::write(store.data_dir().join("2;0;0"), b"\x00orphan").unwrap();

        assert!(store.enumerate_levels(&[2]).unwrap().is_empty());

        // A later save of the same coord finds the base name taken and
        // falls to suffix 0.
        let entry = store.save(coord(2, 0, 0), &regular_tile()).unwrap();
        assert_eq!(entry.filename.as_deref(), Some("2;0;00"));
    }

    #[test]
    fn test_truncated_index_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        store.save(coord(2, 0, 0), &Tile::uniform(0x00)).unwrap();

        let index_path = store.data_dir().join(INDEX_FILE_NAME);
        let bytes = fs::read(&index_path).unwrap();
        fs::write(&index_path, &bytes[..bytes.len() - 3]).unwrap();

        let err = store.enumerate_levels(&[2]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptIndex { .. }));
    }

    #[test]
    fn test_corrupt_data_file_reports_on_load() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();

        let entry = store.save(coord(4, 1, 2), &regular_tile()).unwrap();
        fs::write(store.data_dir().join("4;1;2"), b"\x07bogus").unwrap();

        let err = store.load_payload(&entry).unwrap_err();
        assert!(matches!(err, StoreError::CorruptData { .. }));
    }
}

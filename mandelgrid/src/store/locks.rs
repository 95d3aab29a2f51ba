//! File-access exclusion for the store.
//!
//! Two mechanisms:
//! - a shared set of data filenames currently in use, acquired with a
//!   bounded-wait poll so concurrent users of the same file queue up;
//! - an open-with-retry helper that backs off ~10 ms and retries
//!   indefinitely while the file is held by another process.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::DashMap;

/// Backoff between polls of a contested filename or a locked file.
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Set of data filenames currently being read or written.
#[derive(Debug, Default)]
pub(crate) struct FilenameSet {
    inner: DashMap<String, ()>,
}

impl FilenameSet {
    /// Claims a filename, polling until any current holder releases it.
    pub(crate) fn acquire(self: &Arc<Self>, name: &str) -> FilenameGuard {
        loop {
            let vacant = {
                let entry = self.inner.entry(name.to_string());
                match entry {
                    dashmap::mapref::entry::Entry::Occupied(_) => false,
                    dashmap::mapref::entry::Entry::Vacant(slot) => {
                        slot.insert(());
                        true
                    }
                }
            };

            if vacant {
                return FilenameGuard {
                    set: Arc::clone(self),
                    name: name.to_string(),
                };
            }

            thread::sleep(RETRY_BACKOFF);
        }
    }

    fn release(&self, name: &str) {
        self.inner.remove(name);
    }
}

/// Exclusive claim on one data filename; released on drop.
#[derive(Debug)]
pub(crate) struct FilenameGuard {
    set: Arc<FilenameSet>,
    name: String,
}

impl Drop for FilenameGuard {
    fn drop(&mut self) {
        self.set.release(&self.name);
    }
}

/// Opens a file, retrying while it is in use by another process.
///
/// Any error other than file-in-use is returned immediately.
pub(crate) fn open_with_retry(options: &OpenOptions, path: &Path) -> io::Result<File> {
    loop {
        match options.open(path) {
            Ok(file) => return Ok(file),
            Err(err) if is_file_in_use(&err) => thread::sleep(RETRY_BACKOFF),
            Err(err) => return Err(err),
        }
    }
}

fn is_file_in_use(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        return code == libc::EBUSY || code == libc::ETXTBSY;
    }

    #[cfg(windows)]
    if let Some(code) = err.raw_os_error() {
        // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
        return code == 32 || code == 33;
    }

    false
}

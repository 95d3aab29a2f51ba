//! Process-wide ownership registry for levels.
//!
//! Exactly one leaseboard may own any given level within a process. The
//! registry is constructed once at program start and injected into each
//! leaseboard; it is not a true global.

use std::collections::HashSet;
use std::sync::Mutex;

use super::LeaseboardError;

/// Shared record of which levels are owned by a live leaseboard.
#[derive(Debug, Default)]
pub struct LevelRegistry {
    owned: Mutex<HashSet<u32>>,
}

impl LevelRegistry {
    /// Creates an empty registry.
    pub fn new() -> LevelRegistry {
        LevelRegistry::default()
    }

    /// Claims every level in `levels`, or claims nothing if any of them is
    /// already owned.
    pub fn claim(&self, levels: &[u32]) -> Result<(), LeaseboardError> {
        let mut owned = self.lock();

        if let Some(&taken) = levels.iter().find(|level| owned.contains(level)) {
            return Err(LeaseboardError::LevelAlreadyOwned(taken));
        }

        owned.extend(levels.iter().copied());
        Ok(())
    }

    /// Releases previously claimed levels.
    pub fn release(&self, levels: &[u32]) {
        let mut owned = self.lock();
        for level in levels {
            owned.remove(level);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.owned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! In-memory lease state for one coordinator.
//!
//! The leaseboard tracks which tiles of the owned levels are completed and
//! which are out on lease. It is the concurrency hot spot: every connection
//! handler consults it, so all operations take one internal mutex and do no
//! I/O.
//!
//! Expired leases are reclaimed two ways: lazily, because `next_needed`
//! ignores them, and eagerly by the periodic sweeper. The split keeps a slow
//! enumeration from ever delaying reclamation.

mod lease;
mod registry;

pub use lease::{Lease, Workload};
pub use registry::LevelRegistry;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LevelSpec;
use crate::coord::TileCoord;
use crate::store::IndexEntry;

/// Errors from leaseboard construction.
#[derive(Debug, Error)]
pub enum LeaseboardError {
    /// A configured level is already owned by another leaseboard
    #[error("level {0} is already owned by another coordinator")]
    LevelAlreadyOwned(u32),
}

#[derive(Debug)]
struct BoardState {
    /// Leases currently out; holds full leases, looked up by match, never
    /// keyed by coord alone.
    outstanding: Vec<Lease>,
    /// Coords confirmed persisted (or pending an in-flight save).
    completed: HashSet<TileCoord>,
}

/// Lease and completion state for the levels this coordinator owns.
#[derive(Debug)]
pub struct Leaseboard {
    levels: Vec<LevelSpec>,
    ttl: Duration,
    registry: Arc<LevelRegistry>,
    state: Mutex<BoardState>,
}

impl Leaseboard {
    /// Builds a leaseboard owning `levels`, claiming them in the registry.
    ///
    /// Fails when any level is already owned; a level belongs to exactly one
    /// coordinator.
    pub fn new(
        levels: Vec<LevelSpec>,
        ttl: Duration,
        registry: Arc<LevelRegistry>,
    ) -> Result<Leaseboard, LeaseboardError> {
        let owned = levels.iter().map(|spec| spec.level).collect::<Vec<_>>();
        registry.claim(&owned)?;

        Ok(Leaseboard {
            levels,
            ttl,
            registry,
            state: Mutex::new(BoardState {
                outstanding: Vec::new(),
                completed: HashSet::new(),
            }),
        })
    }

    /// The owned levels, in configuration order.
    pub fn owned_levels(&self) -> Vec<u32> {
        self.levels.iter().map(|spec| spec.level).collect()
    }

    /// Populates the completed set from persisted index entries.
    ///
    /// Called once at startup with the owned-level entries so already-stored
    /// tiles are never re-issued.
    pub fn seed(&self, entries: &[IndexEntry]) {
        let mut state = self.lock();
        for entry in entries {
            state.completed.insert(entry.coord);
        }
        info!(
            completed = state.completed.len(),
            "Seeded leaseboard from persisted tiles"
        );
    }

    /// First tile that is neither completed nor out on a live lease.
    ///
    /// Enumerates levels in configuration order, then `i_real` ascending,
    /// then `i_imag` ascending. An expired lease does not block its coord.
    pub fn next_needed(&self, now: Instant) -> Option<Workload> {
        let state = self.lock();
        self.scan(&state, now)
    }

    /// Records a lease on `workload` expiring one TTL from `now`.
    ///
    /// Any expired lease on the same coord is replaced.
    pub fn grant(&self, workload: Workload, now: Instant) -> Lease {
        let mut state = self.lock();
        Self::grant_locked(&mut state, workload, now, self.ttl)
    }

    /// Selects and leases the next needed tile in one atomic step.
    ///
    /// This is the dispatcher's hand-out path: selection and grant happen
    /// under a single lock acquisition, so racing workers can never be
    /// handed the same coord.
    pub fn grant_next(&self, now: Instant) -> Option<Lease> {
        let mut state = self.lock();
        let workload = self.scan(&state, now)?;
        Some(Self::grant_locked(&mut state, workload, now, self.ttl))
    }

    /// Removes a lease that was granted but never reached its worker.
    pub fn retract(&self, lease: &Lease) {
        let mut state = self.lock();
        state.outstanding.retain(|held| {
            !(held.workload.coord == lease.workload.coord && held.deadline == lease.deadline)
        });
    }

    /// Settles a returning response.
    ///
    /// When a live lease matches, it is removed, the coord joins the
    /// completed set, and `true` is returned. Expired or unknown leases
    /// leave all state untouched.
    pub fn accept(&self, response: &Workload, now: Instant) -> bool {
        let mut state = self.lock();

        let position = state
            .outstanding
            .iter()
            .position(|lease| lease.matches(response, now));

        match position {
            Some(index) => {
                let lease = state.outstanding.swap_remove(index);
                state.completed.insert(lease.workload.coord);
                true
            }
            None => false,
        }
    }

    /// Drops every lease whose deadline has passed. Returns how many.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let before = state.outstanding.len();
        state.outstanding.retain(|lease| !lease.is_expired(now));
        before - state.outstanding.len()
    }

    /// Number of live and expired leases currently recorded.
    pub fn outstanding_count(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Number of completed coords.
    pub fn completed_count(&self) -> usize {
        self.lock().completed.len()
    }

    fn scan(&self, state: &BoardState, now: Instant) -> Option<Workload> {
        for spec in &self.levels {
            for i_real in 0..spec.level {
                for i_imag in 0..spec.level {
                    let coord = TileCoord {
                        level: spec.level,
                        i_real,
                        i_imag,
                    };

                    if state.completed.contains(&coord) {
                        continue;
                    }
                    let on_lease = state
                        .outstanding
                        .iter()
                        .any(|lease| lease.workload.coord == coord && !lease.is_expired(now));
                    if on_lease {
                        continue;
                    }

                    return Some(Workload::new(coord, Some(spec.max_depth)));
                }
            }
        }

        None
    }

    fn grant_locked(
        state: &mut BoardState,
        workload: Workload,
        now: Instant,
        ttl: Duration,
    ) -> Lease {
        state.outstanding.retain(|held| {
            held.workload.coord != workload.coord || !held.is_expired(now)
        });

        let lease = Lease::new(workload, now + ttl);
        state.outstanding.push(lease);
        lease
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Leaseboard {
    fn drop(&mut self) {
        let owned = self.owned_levels();
        self.registry.release(&owned);
    }
}

/// Periodic lease sweeper.
///
/// Runs until shutdown is signalled, sweeping expired leases every `period`.
pub async fn run_sweeper(board: Arc<Leaseboard>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so sweeps start one period in.
    ticker.tick().await;

    info!(period_secs = period.as_secs(), "Lease sweeper started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Lease sweeper shutting down");
                break;
            }

            _ = ticker.tick() => {
                let swept = board.sweep(Instant::now());
                if swept > 0 {
                    debug!(swept, "Swept expired leases");
                }
            }
        }
    }
}

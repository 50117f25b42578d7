//! In-flight request observability registry
//!
//! A slot table holding one entry per active relayed connection, plus three
//! lock-free gauges: active client directions, active upstream directions,
//! and in-flight health checks. The relay writes, the status surface reads
//! a point-in-time copy via [`snapshot`](ActiveRequests::snapshot).
//!
//! Slots are index handles into a growable array with a parallel occupancy
//! mask. Capacity doubles when full and never shrinks, so steady-state
//! traffic allocates nothing. A slot is freed only once both relay
//! directions have reported completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Starting slot capacity; doubles whenever the table fills up
pub const INITIAL_SLOT_CAPACITY: usize = 100;

/// Opaque handle to one allocated slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle(usize);

#[derive(Debug, Default, Clone)]
struct SlotEntry {
    url: String,
    client_addr: String,
    upstream_addr: String,
    client_active: bool,
    upstream_active: bool,
    started_at: Option<Instant>,
}

#[derive(Debug)]
struct SlotTable {
    occupied: Vec<bool>,
    entries: Vec<SlotEntry>,
}

impl SlotTable {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            occupied: vec![false; capacity],
            entries: vec![SlotEntry::default(); capacity],
        }
    }
}

/// Registry of in-flight relayed requests
pub struct ActiveRequests {
    table: Mutex<SlotTable>,
    client_directions: AtomicU64,
    upstream_directions: AtomicU64,
    active_checks: AtomicU64,
}

impl Default for ActiveRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRequests {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(SlotTable::with_capacity(INITIAL_SLOT_CAPACITY)),
            client_directions: AtomicU64::new(0),
            upstream_directions: AtomicU64::new(0),
            active_checks: AtomicU64::new(0),
        }
    }

    /// Claim a free slot for a new connection; the client direction starts active
    pub fn allocate(&self, client_addr: String) -> SlotHandle {
        let mut table = self.table.lock();

        let idx = match table.occupied.iter().position(|occupied| !occupied) {
            Some(idx) => idx,
            None => {
                let old_len = table.occupied.len();
                let new_len = old_len * 2;
                table.occupied.resize(new_len, false);
                table.entries.resize(new_len, SlotEntry::default());
                old_len
            }
        };

        table.occupied[idx] = true;
        table.entries[idx] = SlotEntry {
            client_addr,
            client_active: true,
            started_at: Some(Instant::now()),
            ..SlotEntry::default()
        };
        drop(table);

        self.client_directions.fetch_add(1, Ordering::Relaxed);
        SlotHandle(idx)
    }

    pub fn set_url(&self, handle: SlotHandle, url: impl Into<String>) {
        let mut table = self.table.lock();
        if table.occupied[handle.0] {
            table.entries[handle.0].url = url.into();
        }
    }

    pub fn set_upstream(&self, handle: SlotHandle, addr: impl Into<String>) {
        let mut table = self.table.lock();
        if table.occupied[handle.0] {
            table.entries[handle.0].upstream_addr = addr.into();
        }
    }

    /// Mark the upstream-to-client direction active
    pub fn start_upstream(&self, handle: SlotHandle) {
        let mut table = self.table.lock();
        if table.occupied[handle.0] && !table.entries[handle.0].upstream_active {
            table.entries[handle.0].upstream_active = true;
            drop(table);
            self.upstream_directions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mark the client-to-upstream direction done; frees the slot once both are
    pub fn finish_client(&self, handle: SlotHandle) {
        let mut table = self.table.lock();
        if table.occupied[handle.0] && table.entries[handle.0].client_active {
            table.entries[handle.0].client_active = false;
            Self::maybe_free(&mut table, handle.0);
            drop(table);
            self.client_directions.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Mark the upstream-to-client direction done; frees the slot once both are
    pub fn finish_upstream(&self, handle: SlotHandle) {
        let mut table = self.table.lock();
        if table.occupied[handle.0] && table.entries[handle.0].upstream_active {
            table.entries[handle.0].upstream_active = false;
            Self::maybe_free(&mut table, handle.0);
            drop(table);
            self.upstream_directions.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn maybe_free(table: &mut SlotTable, idx: usize) {
        let entry = &table.entries[idx];
        if !entry.client_active && !entry.upstream_active {
            table.occupied[idx] = false;
            table.entries[idx] = SlotEntry::default();
        }
    }

    /// RAII gauge for one in-flight health check
    pub fn check_guard(self: &Arc<Self>) -> CheckGuard {
        self.active_checks.fetch_add(1, Ordering::Relaxed);
        CheckGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn active_checks(&self) -> u64 {
        self.active_checks.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every occupied slot plus the gauge values
    pub fn snapshot(&self) -> StatsSnapshot {
        let table = self.table.lock();
        let requests = table
            .occupied
            .iter()
            .enumerate()
            .filter(|(_, &occupied)| occupied)
            .map(|(idx, _)| {
                let entry = &table.entries[idx];
                ActiveRequestView {
                    slot: idx,
                    url: entry.url.clone(),
                    client_addr: entry.client_addr.clone(),
                    upstream_addr: entry.upstream_addr.clone(),
                    client_active: entry.client_active,
                    upstream_active: entry.upstream_active,
                    elapsed_ms: entry
                        .started_at
                        .map(|t| t.elapsed().as_millis() as u64)
                        .unwrap_or(0),
                }
            })
            .collect();
        drop(table);

        StatsSnapshot {
            client_directions: self.client_directions.load(Ordering::Relaxed),
            upstream_directions: self.upstream_directions.load(Ordering::Relaxed),
            active_checks: self.active_checks.load(Ordering::Relaxed),
            requests,
        }
    }
}

/// Decrements the active-check gauge when the check task completes
pub struct CheckGuard {
    stats: Arc<ActiveRequests>,
}

impl Drop for CheckGuard {
    fn drop(&mut self) {
        self.stats.active_checks.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One occupied slot as seen by the status surface
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequestView {
    pub slot: usize,
    pub url: String,
    pub client_addr: String,
    pub upstream_addr: String,
    pub client_active: bool,
    pub upstream_active: bool,
    pub elapsed_ms: u64,
}

/// Read-only view consumed by the status surface
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub client_directions: u64,
    pub upstream_directions: u64,
    pub active_checks: u64,
    pub requests: Vec<ActiveRequestView>,
}

//! Round-robin membership list of currently healthy proxies

use parking_lot::Mutex;

use crate::error::{CarouselError, Result};

/// Addresses currently believed reachable, eligible for selection
///
/// The health checker appends and removes members; the relay only calls
/// [`next`](HealthySet::next). One lock, never held across I/O.
#[derive(Debug, Default)]
pub struct HealthySet {
    inner: Mutex<RoundRobin>,
}

#[derive(Debug, Default)]
struct RoundRobin {
    addrs: Vec<String>,
    cursor: usize,
}

impl HealthySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The address at the cursor, advancing with wrap-around
    pub fn next(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        if inner.addrs.is_empty() {
            return Err(CarouselError::EmptyPool);
        }

        if inner.cursor >= inner.addrs.len() {
            inner.cursor = 0;
        }
        let addr = inner.addrs[inner.cursor].clone();
        inner.cursor += 1;
        Ok(addr)
    }

    pub fn append(&self, addr: impl Into<String>) {
        self.inner.lock().addrs.push(addr.into());
    }

    /// Swap-remove the first match; no-op if the address is absent
    pub fn remove(&self, addr: &str) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.addrs.iter().position(|a| a == addr) {
            inner.addrs.swap_remove(idx);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Array-backed binary min-heap of proxy records
//!
//! Ordered by `(due_at, address hash)` so the scheduler always pops the
//! record due soonest, with a deterministic order among records that are
//! due at the same instant. The scheduler's idiom is pop, run the check
//! with the record held exclusively, then push the mutated record back.

use super::record::{address_hash, ProxyRecord};

/// Min-priority registry of all known proxy records
#[derive(Debug, Default)]
pub struct ProxyHeap {
    entries: Vec<ProxyRecord>,
}

impl ProxyHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a record, restoring the heap order
    pub fn push(&mut self, record: ProxyRecord) {
        self.entries.push(record);
        self.sift_up(self.entries.len() - 1);
    }

    /// Remove and return the record due soonest
    pub fn pop(&mut self) -> Option<ProxyRecord> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let min = self.entries.pop();
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// The record due soonest, without removing it
    pub fn peek(&self) -> Option<&ProxyRecord> {
        self.entries.first()
    }

    /// All records in unspecified order, for snapshotting
    pub fn iter(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.entries.iter()
    }

    fn less(a: &ProxyRecord, b: &ProxyRecord) -> bool {
        let a_key = (a.due_at(), address_hash(&a.address));
        let b_key = (b.due_at(), address_hash(&b.address));
        a_key < b_key
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !Self::less(&self.entries[idx], &self.entries[parent]) {
                break;
            }
            self.entries.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;

            if left < len && Self::less(&self.entries[left], &self.entries[smallest]) {
                smallest = left;
            }
            if right < len && Self::less(&self.entries[right], &self.entries[smallest]) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.entries.swap(idx, smallest);
            idx = smallest;
        }
    }
}

impl FromIterator<ProxyRecord> for ProxyHeap {
    fn from_iter<I: IntoIterator<Item = ProxyRecord>>(iter: I) -> Self {
        let mut heap = ProxyHeap::new();
        for record in iter {
            heap.push(record);
        }
        heap
    }
}

//! Upstream proxy pool
//!
//! This module owns everything the relay knows about upstream proxies:
//! - The registry of all known proxies, a min-heap by next check due time
//! - The healthy set the relay selects from, round-robin
//! - The durable snapshot persisting health across restarts
//! - The health-check scheduler driving state between the two

pub mod checker;
pub mod healthy;
pub mod heap;
pub mod record;
pub mod snapshot;

pub use checker::HealthScheduler;
pub use healthy::HealthySet;
pub use heap::ProxyHeap;
pub use record::ProxyRecord;
pub use snapshot::SnapshotStore;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::Result;

/// Shared pool state: the registry of all records plus the healthy set
///
/// The two locks are independent and never nested; critical sections only
/// move or copy records, never perform I/O.
pub struct ProxyPool {
    registry: Mutex<ProxyHeap>,
    pub healthy: HealthySet,
}

impl ProxyPool {
    /// Seed the pool from merged records; healthy ones join the rotation
    pub fn bootstrap(records: Vec<ProxyRecord>) -> Self {
        let healthy = HealthySet::new();
        for record in &records {
            if record.is_healthy() {
                healthy.append(record.address.clone());
            }
        }
        debug!("{} proxies healthy at bootstrap", healthy.len());

        Self {
            registry: Mutex::new(records.into_iter().collect()),
            healthy,
        }
    }

    /// Round-robin pick from the healthy set
    pub fn next_proxy(&self) -> Result<String> {
        self.healthy.next()
    }

    /// Remove the record due soonest; it stays out until pushed back
    pub fn pop_min(&self) -> Option<ProxyRecord> {
        self.registry.lock().pop()
    }

    /// Return a record to the registry
    pub fn push(&self, record: ProxyRecord) {
        self.registry.lock().push(record);
    }

    pub fn registry_len(&self) -> usize {
        self.registry.lock().len()
    }

    /// Copy of every registered record, for snapshot saves
    pub fn records(&self) -> Vec<ProxyRecord> {
        self.registry.lock().iter().cloned().collect()
    }
}

/// Merge the configured address list against a loaded snapshot
///
/// The snapshot must be sorted by address. A configured address found in the
/// snapshot inherits its history; an unknown address starts unverified.
pub fn merge_records(configured: &[String], snapshot: &[ProxyRecord]) -> Vec<ProxyRecord> {
    let mut inherited = 0;
    let records: Vec<ProxyRecord> = configured
        .iter()
        .map(|addr| {
            match snapshot.binary_search_by(|rec| rec.address.as_str().cmp(addr)) {
                Ok(idx) => {
                    inherited += 1;
                    snapshot[idx].clone()
                }
                Err(_) => ProxyRecord::new_unverified(addr.clone()),
            }
        })
        .collect();

    debug!(
        "Merged proxy list: {} inherited, {} new, {} total",
        inherited,
        records.len() - inherited,
        records.len()
    );
    records
}

/// Read the configured proxy list, one "host:port" per line; "-" reads stdin
pub async fn read_proxy_list(path: &str) -> Result<Vec<String>> {
    let contents = if path == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(path).await?
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CarouselError;
    use chrono::Utc;

    #[test]
    fn test_merge_inherits_snapshot_state() {
        let snapshot = vec![ProxyRecord {
            address: "x:1".to_string(),
            last_check: Utc::now(),
            fail_counter: 0,
        }];
        let configured = vec!["x:1".to_string(), "y:2".to_string()];

        let merged = merge_records(&configured, &snapshot);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].address, "x:1");
        assert_eq!(merged[0].fail_counter, 0);
        assert_eq!(merged[1].address, "y:2");
        assert_eq!(merged[1].fail_counter, 1);
    }

    #[test]
    fn test_merge_drops_unconfigured_snapshot_entries() {
        let snapshot = vec![
            ProxyRecord {
                address: "gone:1".to_string(),
                last_check: Utc::now(),
                fail_counter: 0,
            },
            ProxyRecord {
                address: "kept:2".to_string(),
                last_check: Utc::now(),
                fail_counter: 3,
            },
        ];
        let configured = vec!["kept:2".to_string()];

        let merged = merge_records(&configured, &snapshot);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].address, "kept:2");
        assert_eq!(merged[0].fail_counter, 3);
    }

    #[test]
    fn test_bootstrap_seeds_healthy_set() {
        let snapshot = vec![ProxyRecord {
            address: "x:1".to_string(),
            last_check: Utc::now(),
            fail_counter: 0,
        }];
        let configured = vec!["x:1".to_string(), "y:2".to_string()];

        let pool = ProxyPool::bootstrap(merge_records(&configured, &snapshot));
        assert_eq!(pool.registry_len(), 2);
        assert_eq!(pool.healthy.len(), 1);
        assert_eq!(pool.next_proxy().unwrap(), "x:1");
    }

    #[test]
    fn test_bootstrap_empty_pool() {
        let pool = ProxyPool::bootstrap(Vec::new());
        assert_eq!(pool.registry_len(), 0);
        assert!(matches!(pool.next_proxy(), Err(CarouselError::EmptyPool)));
    }

    #[tokio::test]
    async fn test_read_proxy_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        tokio::fs::write(&path, "10.0.0.1:3128\n\n  10.0.0.2:8080  \n")
            .await
            .unwrap();

        let list = read_proxy_list(path.to_str().unwrap()).await.unwrap();
        assert_eq!(list, ["10.0.0.1:3128", "10.0.0.2:8080"]);
    }
}

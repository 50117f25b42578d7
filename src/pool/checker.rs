//! Health-check scheduling for upstream proxies
//!
//! One coordinating loop pops the record due soonest from the registry,
//! dispatches its check as an independent task, and pushes the mutated
//! record back when the check completes. Concurrent checks are bounded by a
//! counting semaphore, and the registry is autosaved on a time gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::healthy::HealthySet;
use super::record::ProxyRecord;
use super::snapshot::SnapshotStore;
use super::ProxyPool;
use crate::config::CheckerConfig;
use crate::error::{CarouselError, Result};
use crate::stats::ActiveRequests;

/// How long the scheduler sleeps when nothing is due yet
///
/// This is a bounded-wait policy, not a precise timer: a record can be
/// checked up to this interval after its due time.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum interval between snapshot autosaves
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(10);

/// Drives health checks and keeps the healthy set current
pub struct HealthScheduler {
    pool: Arc<ProxyPool>,
    store: Arc<SnapshotStore>,
    stats: Arc<ActiveRequests>,
    config: CheckerConfig,
    permits: Arc<Semaphore>,
}

impl HealthScheduler {
    pub fn new(
        pool: Arc<ProxyPool>,
        store: Arc<SnapshotStore>,
        stats: Arc<ActiveRequests>,
        config: CheckerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.check_pool_cap));
        Self {
            pool,
            store,
            stats,
            config,
            permits,
        }
    }

    /// Run the scheduler loop (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health scheduler: {} proxies, at most {} concurrent checks",
            self.pool.registry_len(),
            self.config.check_pool_cap
        );

        let mut last_saved: Option<Instant> = None;

        loop {
            if last_saved.map_or(true, |t| t.elapsed() >= AUTOSAVE_INTERVAL) {
                let records = self.pool.records();
                if let Err(e) = self.store.save(&records).await {
                    warn!("Snapshot save failed: {}", e);
                }
                last_saved = Some(Instant::now());
            }

            let Some(record) = self.pool.pop_min() else {
                if self.idle(&mut shutdown, POLL_INTERVAL).await {
                    break;
                }
                continue;
            };

            let wait = record.recheck_in(Utc::now());
            if wait > Duration::ZERO {
                self.pool.push(record);
                debug!(
                    "Next check due in {:?}, sleeping for {:?}",
                    wait, POLL_INTERVAL
                );
                if self.idle(&mut shutdown, POLL_INTERVAL).await {
                    break;
                }
                continue;
            }

            // Blocks while check_pool_cap checks are in flight.
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => {
                    permit.expect("check semaphore closed")
                }
                _ = shutdown.changed() => {
                    self.pool.push(record);
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let pool = self.pool.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let _gauge = stats.check_guard();
                check_and_update(pool, config, record).await;
            });
        }

        info!("Health scheduler shutting down");
    }

    /// Sleep, returning true if shutdown was requested
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }
}

/// Check one proxy and return the mutated record to the registry
async fn check_and_update(pool: Arc<ProxyPool>, config: CheckerConfig, mut record: ProxyRecord) {
    let ok = check_with_proxy(&record.address, &config).await;
    apply_check_result(&mut record, &pool.healthy, ok);
    record.last_check = Utc::now();
    pool.push(record);
}

/// Apply one check outcome to a record and the healthy set
///
/// The record is owned by its check task here, so the counter and the
/// membership change land together before the record re-enters the registry.
fn apply_check_result(record: &mut ProxyRecord, healthy: &HealthySet, ok: bool) {
    if ok {
        debug!("Proxy {} check OK", record.address);
        if record.fail_counter != 0 {
            healthy.append(record.address.clone());
            record.fail_counter = 0;
        }
    } else {
        debug!("Proxy {} check failed", record.address);
        if record.fail_counter == 0 {
            healthy.remove(&record.address);
        }
        record.fail_counter += 1;
    }
}

/// One GET of the verification URL routed through `addr` as a forward proxy
///
/// Healthy means the response body equals the verification token exactly.
async fn check_with_proxy(addr: &str, config: &CheckerConfig) -> bool {
    match timeout(config.check_timeout, fetch_through_proxy(addr, config)).await {
        Ok(Ok(body)) => body == config.check_token.as_bytes(),
        Ok(Err(e)) => {
            debug!("Proxy check request failed for {}: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("Proxy check timed out for {}", addr);
            false
        }
    }
}

async fn fetch_through_proxy(addr: &str, config: &CheckerConfig) -> Result<Bytes> {
    let stream = TcpStream::connect(addr).await?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| CarouselError::Http(format!("handshake failed: {}", e)))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Check connection ended: {}", e);
        }
    });

    let uri: hyper::Uri = config
        .check_url
        .parse()
        .map_err(|e| CarouselError::Http(format!("bad check URL: {}", e)))?;
    let host = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_default();

    // Absolute-form request target, so the proxy knows where to forward.
    let request = Request::builder()
        .method(hyper::Method::GET)
        .uri(config.check_url.as_str())
        .header(hyper::header::HOST, host)
        .header(hyper::header::CACHE_CONTROL, "no-cache")
        .header("Proxy-Connection", "Keep-Alive")
        .body(Empty::<Bytes>::new())
        .map_err(|e| CarouselError::Http(e.to_string()))?;

    let response = sender.send_request(request).await?;
    let body = response.into_body().collect().await?.to_bytes();
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn healthy_record(address: &str) -> ProxyRecord {
        ProxyRecord {
            address: address.to_string(),
            last_check: Utc::now(),
            fail_counter: 0,
        }
    }

    #[test]
    fn test_failure_removes_from_healthy_set_once() {
        let healthy = HealthySet::new();
        healthy.append("a:1");
        let mut record = healthy_record("a:1");

        apply_check_result(&mut record, &healthy, false);
        assert_eq!(record.fail_counter, 1);
        assert_eq!(healthy.len(), 0);

        // A second consecutive failure must not remove again.
        healthy.append("b:2");
        apply_check_result(&mut record, &healthy, false);
        assert_eq!(record.fail_counter, 2);
        assert_eq!(healthy.len(), 1);
    }

    #[test]
    fn test_success_restores_membership() {
        let healthy = HealthySet::new();
        let mut record = ProxyRecord::new_unverified("a:1");

        apply_check_result(&mut record, &healthy, true);
        assert_eq!(record.fail_counter, 0);
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy.next().unwrap(), "a:1");

        // Success on an already-healthy record must not append again.
        apply_check_result(&mut record, &healthy, true);
        assert_eq!(healthy.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_checks_never_exceed_cap() {
        const CAP: usize = 3;

        let stats = Arc::new(ActiveRequests::new());
        let permits = Arc::new(Semaphore::new(CAP));
        let max_seen = Arc::new(AtomicU64::new(0));

        // Mirrors the scheduler's dispatch discipline: permit first, then
        // the gauge guard inside the task.
        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let stats = stats.clone();
                let permits = permits.clone();
                let max_seen = max_seen.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.unwrap();
                    let _gauge = stats.check_guard();
                    max_seen.fetch_max(stats.active_checks(), Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    max_seen.fetch_max(stats.active_checks(), Ordering::Relaxed);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(max_seen.load(Ordering::Relaxed) <= CAP as u64);
        assert_eq!(stats.active_checks(), 0);
    }

    #[tokio::test]
    async fn test_check_against_unreachable_proxy_fails() {
        let config = CheckerConfig {
            check_timeout: Duration::from_secs(1),
            ..CheckerConfig::default()
        };
        // Reserved port, nothing listens there.
        assert!(!check_with_proxy("127.0.0.1:1", &config).await);
    }
}

//! Relay listener: accepts client connections and spawns one handler each
//!
//! There is no admission control; every accepted connection gets its own
//! task pair, a scaling gap inherited from the source design.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::handler;
use crate::error::Result;
use crate::pool::ProxyPool;
use crate::stats::ActiveRequests;

/// The forward-proxy relay server
pub struct RelayServer {
    listener: TcpListener,
    pool: Arc<ProxyPool>,
    stats: Arc<ActiveRequests>,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: &str,
        pool: Arc<ProxyPool>,
        stats: Arc<ActiveRequests>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            pool,
            stats,
        })
    }

    /// The address actually bound, useful with an ephemeral port
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let pool = self.pool.clone();
                            let stats = self.stats.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handler::handle_connection(stream, client_addr, pool, stats).await
                                {
                                    if e.is_connection_local() {
                                        debug!("Connection from {} ended: {}", client_addr, e);
                                    } else {
                                        warn!("Connection from {} failed: {}", client_addr, e);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Relay server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

//! Per-connection relay between a client and its chosen upstream proxy
//!
//! Each connection carries one parsed request head and then raw bytes in
//! both directions. The client-to-upstream direction runs on the accepting
//! task; the upstream-to-client direction runs on a second task spawned
//! after the request has been written. A response-side read or parse error
//! tears down both sockets, which unblocks the client-to-upstream copy. The
//! observability slot is released once both directions have reported
//! completion.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::debug;

use super::http1::{self, RequestHead, ResponseHead};
use crate::error::{CarouselError, Result};
use crate::pool::ProxyPool;
use crate::stats::{ActiveRequests, SlotHandle};

/// Reserved header: upstream override on requests, upstream used on responses
pub const PROXY_HEADER: &str = "X-Carousel-Proxy";

/// Relay one accepted client connection
///
/// Errors are connection-local; the caller only logs them.
pub async fn handle_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    pool: Arc<ProxyPool>,
    stats: Arc<ActiveRequests>,
) -> Result<()> {
    let slot = stats.allocate(client_addr.to_string());
    let result = relay(stream, pool, &stats, slot).await;
    stats.finish_client(slot);
    result
}

async fn relay(
    mut client: TcpStream,
    pool: Arc<ProxyPool>,
    stats: &Arc<ActiveRequests>,
    slot: SlotHandle,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    let head_len = http1::read_head(&mut client, &mut buf).await?;
    let mut head = RequestHead::parse(&buf[..head_len])?;
    let leftover = buf.split_off(head_len);

    debug!("Got request to {}", head.target);
    stats.set_url(slot, head.target.clone());

    // A client-supplied override wins and is stripped; otherwise round-robin.
    // The override's first value is used as-is, even if it cannot be dialed.
    let upstream_addr = match head.take_header(PROXY_HEADER) {
        Some(addr) => addr,
        None => pool.next_proxy()?,
    };
    stats.set_upstream(slot, upstream_addr.clone());
    debug!("Relaying through {}", upstream_addr);

    let mut upstream = TcpStream::connect(&upstream_addr)
        .await
        .map_err(|e| CarouselError::UpstreamConnect(format!("{}: {}", upstream_addr, e)))?;

    upstream.write_all(&head.encode()).await?;
    if !leftover.is_empty() {
        upstream.write_all(&leftover).await?;
    }

    let (mut client_read, client_write) = client.into_split();
    let (upstream_read, mut upstream_write) = upstream.into_split();

    stats.start_upstream(slot);
    let (abort_tx, mut abort_rx) = oneshot::channel();
    let response_stats = Arc::clone(stats);
    tokio::spawn(async move {
        if let Err(e) = relay_response(upstream_read, client_write, upstream_addr).await {
            debug!("Upstream-to-client direction ended: {}", e);
            let _ = abort_tx.send(());
        }
        response_stats.finish_upstream(slot);
    });

    // Stream whatever else the client sends until EOF or error. A response
    // task that failed to read a valid response head aborts this copy, so
    // both sockets close even while the client holds its side open.
    tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut upstream_write) => {
            match result {
                Ok(n) => debug!("Copied {} residual bytes from client to upstream", n),
                Err(e) => debug!("Client-to-upstream copy ended: {}", e),
            }
            let _ = upstream_write.shutdown().await;
        }
        Ok(()) = &mut abort_rx => {
            debug!("Upstream response failed, closing both sockets");
        }
    }

    Ok(())
}

/// Read one response head, tag it with the upstream used, then stream the rest
async fn relay_response(
    mut upstream: OwnedReadHalf,
    mut client: OwnedWriteHalf,
    upstream_addr: String,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    let result = async {
        let head_len = http1::read_head(&mut upstream, &mut buf).await?;
        let mut head = ResponseHead::parse(&buf[..head_len])?;
        head.push_header(PROXY_HEADER, upstream_addr.as_str());

        client.write_all(&head.encode()).await?;
        let leftover = buf.split_off(head_len);
        if !leftover.is_empty() {
            client.write_all(&leftover).await?;
        }

        let n = tokio::io::copy(&mut upstream, &mut client).await?;
        debug!("Copied {} body bytes from upstream to client", n);
        Ok(())
    }
    .await;

    let _ = client.shutdown().await;
    result
}

//! Connection relay
//!
//! This module provides the forwarding path itself:
//! - The accept loop, one handler task per client connection
//! - Per-connection bidirectional relaying through a selected upstream
//! - HTTP/1.x head parsing and reserved-header rewriting

pub mod handler;
pub mod http1;
pub mod server;

pub use handler::PROXY_HEADER;
pub use server::RelayServer;

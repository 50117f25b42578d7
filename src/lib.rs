//! Carousel - Rotating Forward-Proxy Relay
//!
//! A forwarding proxy that relays client HTTP connections through a rotating
//! pool of upstream proxy servers.
//!
//! ## Features
//!
//! - Round-robin selection over the currently healthy upstream proxies
//! - Continuous health checking with exponential per-proxy backoff
//! - Bounded concurrent health checks
//! - Durable health snapshots merged against the configured list on restart
//! - Per-request upstream override via a reserved header
//! - Plain-text and JSON status pages over the in-flight request registry

pub mod config;
pub mod error;
pub mod pool;
pub mod relay;
pub mod stats;
pub mod status;

pub use config::Config;
pub use error::{CarouselError, Result};

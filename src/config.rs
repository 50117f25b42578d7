use crate::error::{CarouselError, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay listener configuration
    pub relay: RelayConfig,
    /// Status page configuration
    pub status: StatusConfig,
    /// Proxy pool configuration
    pub pool: PoolConfig,
    /// Health checker configuration
    pub checker: CheckerConfig,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the relay listens on (default: 0.0.0.0:3128)
    pub listen_addr: String,
}

#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Address the status server listens on (default: 0.0.0.0:4138)
    pub listen_addr: String,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// File with one proxy "host:port" per line; "-" reads stdin
    pub proxy_file: String,
    /// Path of the durable health snapshot
    pub snapshot_path: String,
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// URL fetched through each candidate proxy
    pub check_url: String,
    /// Exact body the check URL must return
    pub check_token: String,
    /// Maximum number of concurrent health checks
    pub check_pool_cap: usize,
    /// Total timeout for one health check
    pub check_timeout: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            check_url: "http://health.example.com/token.txt".to_string(),
            check_token: "f81d4fae-7dec-11d0-a765-00a0c91e6bf6\n".to_string(),
            check_pool_cap: 100,
            check_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let check_url = get_env_or("CAROUSEL_CHECK_URL", "http://health.example.com/token.txt");
        // Fail early on a URL hyper could not send through a forward proxy.
        let parsed = Url::parse(&check_url).map_err(|e| {
            CarouselError::InvalidConfig(format!("CAROUSEL_CHECK_URL is not a valid URL: {}", e))
        })?;
        if parsed.scheme() != "http" {
            return Err(CarouselError::InvalidConfig(
                "CAROUSEL_CHECK_URL must use the http scheme".into(),
            ));
        }
        if parsed.host_str().is_none() {
            return Err(CarouselError::InvalidConfig(
                "CAROUSEL_CHECK_URL must include a host".into(),
            ));
        }

        // Zero would stall the check scheduler on an empty semaphore.
        let check_pool_cap: usize = get_env_or("CAROUSEL_CHECK_POOL_CAP", "100")
            .parse()
            .ok()
            .filter(|cap| *cap > 0)
            .ok_or_else(|| {
                CarouselError::InvalidConfig(
                    "CAROUSEL_CHECK_POOL_CAP must be a positive number".into(),
                )
            })?;

        Ok(Config {
            relay: RelayConfig {
                listen_addr: get_env_or("CAROUSEL_LISTEN_ADDR", "0.0.0.0:3128"),
            },
            status: StatusConfig {
                listen_addr: get_env_or("CAROUSEL_STATUS_ADDR", "0.0.0.0:4138"),
            },
            pool: PoolConfig {
                proxy_file: get_env_or("CAROUSEL_PROXY_FILE", "-"),
                snapshot_path: get_env_or("CAROUSEL_SNAPSHOT_PATH", ".carousel.snapshot"),
            },
            checker: CheckerConfig {
                check_url,
                check_token: get_env_or(
                    "CAROUSEL_CHECK_TOKEN",
                    "f81d4fae-7dec-11d0-a765-00a0c91e6bf6\n",
                ),
                check_pool_cap,
                check_timeout: Duration::from_secs(
                    get_env_or("CAROUSEL_CHECK_TIMEOUT", "60").parse().map_err(|_| {
                        CarouselError::InvalidConfig(
                            "CAROUSEL_CHECK_TIMEOUT must be a number of seconds".into(),
                        )
                    })?,
                ),
            },
        })
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

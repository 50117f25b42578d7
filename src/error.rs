use thiserror::Error;

/// Unified error type for the Carousel relay
#[derive(Error, Debug)]
pub enum CarouselError {
    // Pool errors
    #[error("proxy pool is empty")]
    EmptyPool,

    // Relay errors
    #[error("malformed HTTP request: {0}")]
    InvalidRequest(String),

    #[error("malformed HTTP response: {0}")]
    InvalidResponse(String),

    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),

    // Persistence errors
    #[error("snapshot file {path} is corrupt: {reason}")]
    SnapshotCorrupt { path: String, reason: String },

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for Carousel operations
pub type Result<T> = std::result::Result<T, CarouselError>;

impl CarouselError {
    /// Whether the error terminates only the connection that produced it
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            CarouselError::EmptyPool
                | CarouselError::InvalidRequest(_)
                | CarouselError::InvalidResponse(_)
                | CarouselError::UpstreamConnect(_)
        )
    }
}

// Convert from hyper errors
impl From<hyper::Error> for CarouselError {
    fn from(err: hyper::Error) -> Self {
        CarouselError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for CarouselError {
    fn from(err: url::ParseError) -> Self {
        CarouselError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_local_classification() {
        assert!(CarouselError::EmptyPool.is_connection_local());
        assert!(CarouselError::InvalidRequest("truncated head".into()).is_connection_local());
        assert!(CarouselError::UpstreamConnect("refused".into()).is_connection_local());

        assert!(!CarouselError::SnapshotCorrupt {
            path: ".carousel.snapshot".into(),
            reason: "bad magic".into(),
        }
        .is_connection_local());
        assert!(!CarouselError::InvalidConfig("bad port".into()).is_connection_local());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(CarouselError::EmptyPool.to_string(), "proxy pool is empty");

        let err = CarouselError::SnapshotCorrupt {
            path: "/tmp/snap".into(),
            reason: "unexpected EOF".into(),
        };
        assert_eq!(
            err.to_string(),
            "snapshot file /tmp/snap is corrupt: unexpected EOF"
        );
    }
}

//! Error types for the gena-client crate.

use job_pool::PoolError;

/// Errors surfaced by the GENA control-point operations.
#[derive(Debug, thiserror::Error)]
pub enum GenaError {
    /// The handle id is not a live client handle
    #[error("handle is not a registered client handle")]
    BadHandle,

    /// The subscription id is unknown to this handle
    #[error("subscription id not found on this handle")]
    BadSid,

    /// DNS, connect, write, read or timeout failure on the wire
    #[error("transport failure: {0}")]
    SocketConnect(String),

    /// The publisher answered SUBSCRIBE with a non-200 status
    #[error("SUBSCRIBE rejected with HTTP status {0}")]
    SubscribeUnaccepted(u16),

    /// The publisher answered UNSUBSCRIBE with a non-200 status
    #[error("UNSUBSCRIBE rejected with HTTP status {0}")]
    UnsubscribeUnaccepted(u16),

    /// SUBSCRIBE succeeded but the SID or TIMEOUT header is missing or
    /// malformed
    #[error("missing or malformed SID/TIMEOUT in SUBSCRIBE response")]
    BadResponse,

    /// The event URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The underlying pool or timer refused the operation
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Convenience type alias for Results using GenaError.
pub type Result<T> = std::result::Result<T, GenaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            GenaError::SubscribeUnaccepted(503).to_string(),
            "SUBSCRIBE rejected with HTTP status 503"
        );
        assert!(GenaError::BadSid.to_string().contains("subscription id"));
    }
}

use std::time::Duration;
use thiserror::Error;

/// RETS client error types
///
/// A `401` that survives the single challenge retry is not an error: it is
/// returned as a normal response and the caller inspects the status.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RetsError {
    /// The cookie store could not be initialised or persisted
    #[error("Cookie store error: {0}")]
    CookieStore(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request URL is not an absolute http(s) URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that was rejected
        url: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Single request attempt timed out in the transport
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's deadline passed before the exchange completed
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Response payload could not be decoded as XML
    #[error("XML decode error: {0}")]
    Decode(#[from] rets_xml::DecodeError),
}

impl From<hyper::Error> for RetsError {
    fn from(err: hyper::Error) -> Self {
        RetsError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for RetsError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        RetsError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn transport_error_keeps_io_kind() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "rets.example.com:6103");
        let err = RetsError::Transport(Box::new(refused));

        let io_err = err.source().unwrap().downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn cookie_snapshot_error_is_reported() {
        let err = RetsError::CookieStore("trailing characters at line 1".into());
        assert!(err.to_string().contains("trailing characters"));
        assert!(err.source().is_some());
    }

    #[test]
    fn deadline_and_timeout_are_distinct() {
        let attempt = RetsError::Timeout(Duration::from_secs(300));
        assert!(attempt.to_string().contains("300s"));
        assert!(!matches!(attempt, RetsError::DeadlineExceeded));
    }
}

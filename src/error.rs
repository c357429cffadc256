use std::io;

use http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the routing core.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A handler upstream of the round tripper failed to populate the
    /// request context. The message carries the missing key name.
    #[error("{0} not set on context")]
    ContextMissing(&'static str),

    /// The route pool is empty, or every endpoint has been exhausted.
    #[error("no endpoints available")]
    NoEndpointsAvailable,

    /// A retryable network failure (dial refused, connection reset, host
    /// unreachable) persisted through every retry attempt.
    #[error("endpoint failed: {0}")]
    EndpointFailure(#[source] io::Error),

    /// A non-retryable transport error; surfaced after a single attempt.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] io::Error),

    /// An endpoint's canonical address could not be turned into a request
    /// target.
    #[error("invalid backend address: {0}")]
    InvalidAddress(String),
}

impl RouterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::ContextMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::NoEndpointsAvailable
            | RouterError::EndpointFailure(_)
            | RouterError::Upstream(_)
            | RouterError::InvalidAddress(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_missing_message_names_the_key() {
        let err = RouterError::ContextMissing("RoutePool");
        assert!(err.to_string().contains("RoutePool"));

        let err = RouterError::ContextMissing("ProxyResponseWriter");
        assert!(err.to_string().contains("ProxyResponseWriter"));

        let err = RouterError::ContextMissing("AccessLogRecord");
        assert!(err.to_string().contains("AccessLogRecord"));
    }

    #[test]
    fn gateway_errors_map_to_502() {
        assert_eq!(
            RouterError::NoEndpointsAvailable.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RouterError::Upstream(io::Error::other("boom")).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RouterError::ContextMissing("RoutePool").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

//! LLM error types.

use thiserror::Error;

/// Errors that can occur when making LLM API calls.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider reported an error inside an accepted stream
    #[error("stream error: {0}")]
    Stream(String),
}

/// Coarse failure classes that drive the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Bad or missing credential. Never retried.
    Authentication,
    /// Could not reach the provider, or the connection dropped.
    Connection,
    /// The provider did not answer in time.
    Timeout,
    /// Anything else.
    Unknown,
}

impl LLMError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LLMError::Request(e) if e.is_timeout() => FailureKind::Timeout,
            LLMError::Request(e) if e.is_connect() || e.is_request() || e.is_body() => {
                FailureKind::Connection
            }
            LLMError::Request(_) => FailureKind::Unknown,
            LLMError::Api { status, .. } => classify_status(*status),
            LLMError::Stream(_) => FailureKind::Unknown,
        }
    }
}

fn classify_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::Authentication,
        408 | 504 => FailureKind::Timeout,
        _ => FailureKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> LLMError {
        LLMError::Api {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn auth_statuses_are_authentication() {
        assert_eq!(api(401).kind(), FailureKind::Authentication);
        assert_eq!(api(403).kind(), FailureKind::Authentication);
    }

    #[test]
    fn gateway_timeouts_are_timeouts() {
        assert_eq!(api(408).kind(), FailureKind::Timeout);
        assert_eq!(api(504).kind(), FailureKind::Timeout);
    }

    #[test]
    fn other_statuses_are_unknown() {
        assert_eq!(api(400).kind(), FailureKind::Unknown);
        assert_eq!(api(429).kind(), FailureKind::Unknown);
        assert_eq!(api(500).kind(), FailureKind::Unknown);
    }

    #[test]
    fn in_stream_errors_are_unknown() {
        let err = LLMError::Stream("overloaded".to_string());
        assert_eq!(err.kind(), FailureKind::Unknown);
    }

    #[test]
    fn api_error_display() {
        let err = LLMError::Api {
            status: 401,
            message: "invalid key".to_string(),
        };
        assert_eq!(err.to_string(), "api error (status 401): invalid key");
    }
}

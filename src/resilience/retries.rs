//! Retry eligibility.
//!
//! # Design Decisions
//! - Connection errors, timeouts and 5xx responses are transient
//! - Idempotent methods are always eligible
//! - POST/PATCH are eligible only with an `Idempotency-Key` header, unless
//!   `retries.retry_non_idempotent` opts every verb in

use http::{HeaderMap, Method, StatusCode};

use crate::config::RetryConfig;
use crate::pipeline::IDEMPOTENCY_KEY;

/// Whether an upstream status should be treated as a transient failure.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Whether a request may be sent more than once.
pub fn is_retry_eligible(method: &Method, headers: &HeaderMap, config: &RetryConfig) -> bool {
    method.is_idempotent() || config.retry_non_idempotent || headers.contains_key(&IDEMPOTENCY_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_eligibility() {
        let config = RetryConfig::default();
        let empty = HeaderMap::new();
        assert!(is_retry_eligible(&Method::GET, &empty, &config));
        assert!(is_retry_eligible(&Method::PUT, &empty, &config));
        assert!(is_retry_eligible(&Method::DELETE, &empty, &config));
        assert!(!is_retry_eligible(&Method::POST, &empty, &config));
        assert!(!is_retry_eligible(&Method::PATCH, &empty, &config));

        let mut keyed = HeaderMap::new();
        keyed.insert(IDEMPOTENCY_KEY, HeaderValue::from_static("order-17"));
        assert!(is_retry_eligible(&Method::POST, &keyed, &config));

        let permissive = RetryConfig {
            retry_non_idempotent: true,
            ..RetryConfig::default()
        };
        assert!(is_retry_eligible(&Method::PATCH, &empty, &permissive));
    }
}

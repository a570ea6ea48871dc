//! Conceptual error taxonomy, classified from an optional HTTP status
//! plus a message, preferring the status code and falling back to
//! substring matching — the same two-tier approach
//! `walletd_resilience::retry_policy::HttpRetryClassifier` uses for retry
//! decisions, generalized to the richer kind set this crate needs.

use thiserror::Error;

/// Manager-level initialization failure.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("manager used before init() completed")]
    NotInitialized,
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Conceptual classification of a failed probe or caller-reported error.
/// Not a `std::error::Error` itself — it tags an underlying failure so
/// the health checker and rate limiter can react appropriately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    PermanentEndpointError,
    TransientServerError,
    Timeout,
    Malformed,
    BrowserIncompatible,
    Unknown,
}

const CORS_SUBSTRINGS: &[&str] = &[
    "cors",
    "access-control",
    "x-ton-client-version",
    "blocked by cors policy",
    "not allowed by access-control-allow-headers",
];

/// Classify a failure. `status` is the HTTP status code if the transport
/// exposed one; `message` is whatever human-readable text is available.
/// Status code takes precedence; substring matching is the fallback for
/// transports that don't expose a status (timeouts, aborted connections,
/// browser `fetch` rejections).
pub fn classify(status: Option<u16>, message: &str) -> ErrorClass {
    if is_cors(message) {
        return ErrorClass::BrowserIncompatible;
    }

    if let Some(code) = status {
        if code == 429 {
            return ErrorClass::RateLimited;
        }
        if code == 404 || code == 401 || code == 403 {
            return ErrorClass::PermanentEndpointError;
        }
        if code == 502 || code == 503 {
            return ErrorClass::TransientServerError;
        }
        if (500..600).contains(&code) {
            return ErrorClass::TransientServerError;
        }
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        return ErrorClass::RateLimited;
    }
    if lower.contains("timeout") || lower.contains("abort") || lower.contains("deadline") {
        return ErrorClass::Timeout;
    }
    if lower.contains("404") || lower.contains("not found") {
        return ErrorClass::PermanentEndpointError;
    }
    if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized") {
        return ErrorClass::PermanentEndpointError;
    }
    if lower.contains("502")
        || lower.contains("503")
        || lower.contains("bad gateway")
        || lower.contains("backend error")
        || lower.contains("service unavailable")
    {
        return ErrorClass::TransientServerError;
    }
    if lower.contains("invalid seqno")
        || lower.contains("unknown envelope")
        || lower.contains("invalid json")
        || lower.contains("malformed")
    {
        return ErrorClass::Malformed;
    }

    ErrorClass::Unknown
}

fn is_cors(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CORS_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_wins_over_message_text() {
        assert_eq!(classify(Some(429), "ok"), ErrorClass::RateLimited);
        assert_eq!(classify(Some(404), "ok"), ErrorClass::PermanentEndpointError);
        assert_eq!(classify(Some(503), "ok"), ErrorClass::TransientServerError);
    }

    #[test]
    fn falls_back_to_substrings_without_a_status() {
        assert_eq!(classify(None, "Too Many Requests"), ErrorClass::RateLimited);
        assert_eq!(
            classify(None, "upstream bad gateway"),
            ErrorClass::TransientServerError
        );
        assert_eq!(classify(None, "request timeout"), ErrorClass::Timeout);
    }

    #[test]
    fn cors_wins_regardless_of_status() {
        assert_eq!(
            classify(Some(500), "blocked by CORS policy"),
            ErrorClass::BrowserIncompatible
        );
    }

    #[test]
    fn bare_network_error_is_not_cors() {
        assert_eq!(classify(None, "network error"), ErrorClass::Unknown);
    }

    #[test]
    fn unrecognized_text_is_unknown() {
        assert_eq!(classify(None, "the sky is falling"), ErrorClass::Unknown);
    }
}

//! Error Classifier (spec.md §4.3): maps any failure surfaced during an
//! execution attempt to one of seven categories, each carrying a retry
//! policy and a user-safe message. Shaped after
//! `fc-common::OutboxStatus`/`fc-outbox::http_dispatcher::ItemStatus` — a
//! small fixed enum with `is_retryable`/policy lookup — applied to exception
//! classification instead of HTTP status codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    Network,
    AgentError,
    UserError,
    SystemError,
    Unknown,
}

/// Retry policy for one category: max attempts and exponential backoff
/// parameters (`base * multiplier^attempt`, capped).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_secs: u64,
    pub multiplier: u64,
    pub cap_secs: u64,
}

impl ErrorCategory {
    pub fn policy(self) -> RetryPolicy {
        match self {
            ErrorCategory::RateLimit => RetryPolicy {
                max_retries: 5,
                base_secs: 30,
                multiplier: 4,
                cap_secs: 3600,
            },
            ErrorCategory::Timeout => RetryPolicy {
                max_retries: 3,
                base_secs: 10,
                multiplier: 3,
                cap_secs: 300,
            },
            ErrorCategory::Network => RetryPolicy {
                max_retries: 3,
                base_secs: 10,
                multiplier: 3,
                cap_secs: 300,
            },
            ErrorCategory::AgentError => RetryPolicy {
                max_retries: 2,
                base_secs: 60,
                multiplier: 3,
                cap_secs: 900,
            },
            ErrorCategory::UserError => RetryPolicy {
                max_retries: 0,
                base_secs: 0,
                multiplier: 1,
                cap_secs: 0,
            },
            ErrorCategory::SystemError => RetryPolicy {
                max_retries: 1,
                base_secs: 300,
                multiplier: 3,
                cap_secs: 3600,
            },
            // UNKNOWN must retry at least once (P8): no failure silently
            // disappears just because it doesn't match a known pattern.
            ErrorCategory::Unknown => RetryPolicy {
                max_retries: 2,
                base_secs: 300,
                multiplier: 3,
                cap_secs: 3600,
            },
        }
    }

    /// `should_retry(category, attempt) ⇔ attempt < max_retries[category]`.
    pub fn should_retry(self, attempt: u32) -> bool {
        attempt < self.policy().max_retries
    }

    /// `min(base * multiplier^attempt, cap)`, in whole seconds.
    pub fn retry_delay_secs(self, attempt: u32) -> u64 {
        let policy = self.policy();
        let scaled = policy
            .base_secs
            .saturating_mul(policy.multiplier.saturating_pow(attempt));
        scaled.min(policy.cap_secs)
    }

    /// User-safe message: never leaks `internal_error` technical detail.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => {
                "We're being rate limited while checking this. We'll try again shortly."
            }
            ErrorCategory::Timeout => {
                "The check took too long to complete. We'll try again shortly."
            }
            ErrorCategory::Network => {
                "A network issue prevented us from completing this check. We'll try again shortly."
            }
            ErrorCategory::AgentError => {
                "The monitoring agent reported a problem. We'll try again shortly."
            }
            ErrorCategory::UserError => "Unable to process this request.",
            ErrorCategory::SystemError => {
                "An internal error occurred while processing this check. We'll try again shortly."
            }
            ErrorCategory::Unknown => {
                "An unexpected error occurred while processing this check. We'll try again shortly."
            }
        }
    }
}

/// Classify an exception/error message into a category. Classification
/// order (first match wins): exception "kind" hint, then case-insensitive
/// substring match on the message against category patterns. Unmatched
/// falls through to UNKNOWN (logged by the caller for catalog growth).
pub fn classify(kind: ExceptionKind, message: &str) -> ErrorCategory {
    match kind {
        ExceptionKind::Timeout => return ErrorCategory::Timeout,
        ExceptionKind::Connection => return ErrorCategory::Network,
        ExceptionKind::Database => return ErrorCategory::SystemError,
        ExceptionKind::Generic => {}
    }

    let lower = message.to_lowercase();
    if contains_any(&lower, &["429", "rate limit", "quota"]) {
        ErrorCategory::RateLimit
    } else if contains_any(&lower, &["timeout", "timed out"]) {
        ErrorCategory::Timeout
    } else if contains_any(&lower, &["connection refused", "connection reset", "connection closed"]) {
        ErrorCategory::Network
    } else if lower.contains("agent task failed") {
        ErrorCategory::AgentError
    } else if contains_any(&lower, &["invalid", "malformed"]) {
        ErrorCategory::UserError
    } else {
        ErrorCategory::Unknown
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// A coarse hint about where the exception originated, so the classifier
/// can short-circuit on exception type before falling back to substring
/// matching on the message (matches spec.md §4.3's classification order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Timeout,
    Connection,
    Database,
    Generic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_exception_kind_first() {
        assert_eq!(
            classify(ExceptionKind::Timeout, "agent task failed"),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn classifies_rate_limit_by_message() {
        assert_eq!(
            classify(ExceptionKind::Generic, "HTTP 429 Too Many Requests"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            classify(ExceptionKind::Generic, "quota exceeded for this key"),
            ErrorCategory::RateLimit
        );
    }

    #[test]
    fn classifies_user_error_by_message() {
        assert_eq!(
            classify(ExceptionKind::Generic, "invalid schedule expression"),
            ErrorCategory::UserError
        );
    }

    #[test]
    fn unmatched_message_is_unknown() {
        assert_eq!(
            classify(ExceptionKind::Generic, "something bizarre happened"),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn user_error_never_retries() {
        assert!(!ErrorCategory::UserError.should_retry(0));
    }

    #[test]
    fn unknown_always_has_at_least_one_retry() {
        assert!(ErrorCategory::Unknown.policy().max_retries >= 1);
    }

    #[test]
    fn retry_delay_is_capped() {
        let category = ErrorCategory::RateLimit;
        // base=30, multiplier=4: attempt 10 would be astronomically large
        // without the cap.
        assert_eq!(category.retry_delay_secs(10), 3600);
    }

    #[test]
    fn retry_delay_grows_exponentially_before_cap() {
        let category = ErrorCategory::Timeout; // base=10, multiplier=3, cap=300
        assert_eq!(category.retry_delay_secs(0), 10);
        assert_eq!(category.retry_delay_secs(1), 30);
        assert_eq!(category.retry_delay_secs(2), 90);
    }

    #[test]
    fn should_retry_respects_max_retries_boundary() {
        let category = ErrorCategory::AgentError; // max_retries = 2
        assert!(category.should_retry(0));
        assert!(category.should_retry(1));
        assert!(!category.should_retry(2));
    }

    #[test]
    fn user_message_never_contains_raw_error_text() {
        let raw = "panic: connection refused at src/agent.rs:42";
        let category = classify(ExceptionKind::Connection, raw);
        assert!(!category.user_message().contains("panic"));
        assert!(!category.user_message().contains("src/agent.rs"));
    }
}

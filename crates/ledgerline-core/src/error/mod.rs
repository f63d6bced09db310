//! # Error Handling
//!
//! Error types shared across the isolation core. All fallible operations in
//! the workspace return [`CoreError`], which keeps the error taxonomy of the
//! platform in one place:
//!
//! 1. **Context errors**: a missing ambient context is a programming error,
//!    surfaced as [`CoreError::MissingContext`] and never downgraded to an
//!    authentication failure.
//! 2. **Authn/authz errors**: [`CoreError::Unauthorized`] and
//!    [`CoreError::Forbidden`] carry the caller-facing distinction between a
//!    bad credential and a valid credential with insufficient standing.
//! 3. **Data errors**: conflicts, validation failures and not-found
//!    conditions map one-to-one onto HTTP semantics at the API boundary.
//! 4. **Transient errors**: deadlocks and serialization failures are
//!    classified [`ErrorCategory::Transient`] and retried internally by the
//!    query executor; they never reach a caller unless retries are exhausted.

pub mod retry;
pub mod types;

pub use retry::{retry_with_policy, RetryPolicy};
pub use types::CoreError;

/// Error categories for classification and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transient errors that may succeed on retry
    Transient,
    /// Permanent errors that won't succeed on retry
    Permanent,
    /// User errors (bad input, validation failures)
    User,
    /// System errors (infrastructure, dependencies)
    System,
}

/// Result type with core error
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = CoreError::retryable("deadlock detected");
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_conflict_is_not_retryable() {
        let err = CoreError::conflict("duplicate key value violates unique constraint");
        assert_eq!(err.category(), ErrorCategory::User);
        assert!(!err.is_retryable());
    }
}

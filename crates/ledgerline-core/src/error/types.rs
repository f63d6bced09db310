use super::ErrorCategory;

/// Primary error type for all Ledgerline core operations.
///
/// Each variant corresponds to one failure mode recognized across the
/// isolation core. The API layer maps these onto HTTP statuses; internal
/// callers match on variants to decide retry and rollback behavior.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// `context::current()` was called where no ambient context is set.
    ///
    /// This is always a programming error in the caller, never a request
    /// problem. It maps to a 500-class response and must not be coerced to
    /// 401/403.
    #[error("no ambient tenant context established for this operation")]
    MissingContext,

    /// Credential missing, malformed, or carrying an invalid signature.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Caller-safe description of the rejection
        message: String,
    },

    /// Valid credential but the caller is not allowed to proceed: tenant
    /// inactive, role insufficient, or cross-tenant access attempted.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Caller-safe description of the rejection
        message: String,
    },

    /// Unique-constraint violation surfaced to the caller.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting write
        message: String,
    },

    /// Entity does not exist inside the caller's tenant scope.
    ///
    /// Carries no information about whether the id exists in another tenant.
    #[error("{entity} not found")]
    NotFound {
        /// Entity kind, e.g. "invoice" or "quarantine record"
        entity: String,
    },

    /// Input validation failure with per-field messages.
    #[error("validation failed: {}", messages.join("; "))]
    Validation {
        /// Ordered list of per-field error messages
        messages: Vec<String>,
    },

    /// Authentication tag mismatch while decrypting an envelope or field.
    ///
    /// Fatal for the operation. Never logged-and-continued, never returned
    /// alongside a partially decrypted value.
    #[error("decryption failed: authentication tag mismatch or corrupted data")]
    DecryptionFailed,

    /// Encryption-side failure (bad key length, cipher setup).
    #[error("crypto error: {message}")]
    Crypto { message: String },

    /// A schema name failed the literal grammar check before SQL binding.
    ///
    /// This is the sole fence between stored schema names and
    /// `SET LOCAL search_path`, so any mismatch aborts the operation.
    #[error("schema name {name:?} violates the tenant schema grammar")]
    SchemaViolation { name: String },

    /// Database operation failure that is neither transient nor a conflict.
    #[error("database error: {message}")]
    Database { message: String },

    /// The operation could not acquire a backend resource inside its
    /// budget, e.g. a connection checkout past the identity-resolution
    /// timeout. A 503-class failure.
    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    /// Deadlock or serialization failure. Retried internally by the query
    /// executor; escalates as a generic database error once retries are
    /// exhausted.
    #[error("retryable database failure: {message}")]
    Retryable { message: String },

    /// Tenant provisioning failure after compensation completed.
    #[error("provisioning failed: {message}")]
    Provisioning { message: String },

    /// Configuration or environment problem detected at startup.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl CoreError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation { messages }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }

    /// Classify the error for retry and monitoring decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Retryable { .. } => ErrorCategory::Transient,
            Self::Validation { .. } | Self::Conflict { .. } | Self::NotFound { .. } => {
                ErrorCategory::User
            }
            Self::Unauthorized { .. } | Self::Forbidden { .. } => ErrorCategory::User,
            Self::MissingContext
            | Self::DecryptionFailed
            | Self::Crypto { .. }
            | Self::SchemaViolation { .. }
            | Self::Configuration { .. } => ErrorCategory::System,
            Self::Database { .. } | Self::Provisioning { .. } | Self::Unavailable { .. } => {
                ErrorCategory::Permanent
            }
        }
    }

    /// Whether the query executor may re-run the enclosing transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation {
            messages: vec![format!("invalid JSON payload: {}", e)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_leaks_no_location() {
        let err = CoreError::not_found("invoice");
        assert_eq!(err.to_string(), "invoice not found");
    }

    #[test]
    fn test_validation_joins_messages() {
        let err = CoreError::validation(vec![
            "row 1: customer_name is required".to_string(),
            "row 2: amount must be positive".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("row 1"));
        assert!(text.contains("row 2"));
    }

    #[test]
    fn test_missing_context_is_system_error() {
        assert_eq!(CoreError::MissingContext.category(), ErrorCategory::System);
    }
}

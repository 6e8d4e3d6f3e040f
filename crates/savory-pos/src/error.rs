//! # Integration Error Types
//!
//! Error taxonomy for the POS integration engine.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Integration Error Categories                        │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │ Authentication  │  │     Transient           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Config         │  │  AuthFailed     │  │  RateLimited            │ │
//! │  │  (deployment    │  │  InvalidState   │  │  Transport              │ │
//! │  │   problem, not  │  │  SignatureInvalid│ │  Http 5xx               │ │
//! │  │   tenant error) │  │  TenantMismatch │  │  (bounded retry)        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Tenant        │  │   Unsupported   │  │     Internal            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  TenantNotFound │  │  NotSupported   │  │  Database               │ │
//! │  │  NotConnected   │  │  (explicit      │  │  Serialization          │ │
//! │  │                 │  │   result, never │  │  Channel                │ │
//! │  │                 │  │   attempted)    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operator-facing surfaces translate these to short human-readable
//! messages; raw provider bodies stay in the logs.

use thiserror::Error;

use savory_core::Provider;

/// Result type alias for integration operations.
pub type PosResult<T> = Result<T, PosError>;

/// Integration engine errors.
#[derive(Debug, Error)]
pub enum PosError {
    // =========================================================================
    // Configuration Errors (deployment, not tenant)
    // =========================================================================
    /// Missing or malformed deployment configuration (application
    /// credentials, notification URL template, secrets).
    #[error("Integration configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Authentication / Signature Errors
    // =========================================================================
    /// The provider rejected our credentials (HTTP 401).
    ///
    /// This is a *signal*: the caller reports it to the OAuth lifecycle
    /// manager, which owns the connected-flag transition. Nothing else
    /// writes that flag.
    #[error("Provider {provider} rejected credentials")]
    AuthFailed { provider: Provider },

    /// The OAuth state token failed to decode (tampered, expired, garbage).
    #[error("Invalid or expired authorization state")]
    InvalidState,

    /// Webhook signature did not match.
    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    /// A tenant-scoped webhook carried another tenant's merchant id.
    #[error("Webhook merchant does not match tenant")]
    TenantMismatch,

    // =========================================================================
    // Tenant Errors
    // =========================================================================
    /// The referenced tenant does not exist.
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// The tenant has no usable provider connection.
    #[error("Tenant {tenant} has no usable {provider} connection")]
    NotConnected { tenant: String, provider: Provider },

    // =========================================================================
    // Transient Provider Errors
    // =========================================================================
    /// Rate limited after exhausting every retry attempt.
    #[error("Provider rate limit persisted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Non-2xx provider response. The body is preserved for diagnostics
    /// (logged, never shown to operators).
    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level failure talking to the provider.
    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    // =========================================================================
    // Unsupported Operations
    // =========================================================================
    /// The operation is not available for this provider; returned as an
    /// explicit result, never attempted.
    #[error("{operation} is not supported for {provider}: {reason}")]
    NotSupported {
        operation: &'static str,
        provider: Provider,
        reason: String,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Reconciled-store failure.
    #[error("Database error: {0}")]
    Database(#[from] savory_db::DbError),

    /// Payload (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Credential vault failure (bad blob, wrong key).
    #[error("Credential vault error: {0}")]
    Vault(String),

    /// Job queue channel closed.
    #[error("Job channel error: {0}")]
    Channel(String),
}

// =============================================================================
// Error Categorization
// =============================================================================

impl PosError {
    /// True when retrying the same operation later can succeed.
    ///
    /// ## Retryable
    /// - Rate limiting that outlived the bounded in-call retries
    /// - 5xx provider responses
    /// - Network-level transport failures
    ///
    /// ## Non-Retryable
    /// - Configuration problems
    /// - Auth/signature failures (need operator or lifecycle action)
    /// - Unsupported operations
    pub fn is_retryable(&self) -> bool {
        match self {
            PosError::RateLimited { .. } | PosError::Transport(_) => true,
            PosError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True when the failure is a deployment configuration problem, which
    /// operators must be able to tell apart from tenant problems.
    pub fn is_config_error(&self) -> bool {
        matches!(self, PosError::Config(_))
    }

    /// True when the provider rejected our credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, PosError::AuthFailed { .. })
    }

    /// Short operator-safe message. Raw provider bodies and internals stay
    /// in the logs.
    pub fn operator_message(&self) -> String {
        match self {
            PosError::Config(_) => {
                "POS integration is not configured. Contact support.".to_string()
            }
            PosError::AuthFailed { provider } => {
                format!("{} connection expired. Please reconnect.", provider)
            }
            PosError::InvalidState | PosError::SignatureInvalid | PosError::TenantMismatch => {
                "Authorization could not be verified.".to_string()
            }
            PosError::TenantNotFound(_) => "Restaurant not found.".to_string(),
            PosError::NotConnected { provider, .. } => {
                format!("No active {} connection.", provider)
            }
            PosError::RateLimited { .. } | PosError::Http { .. } | PosError::Transport(_) => {
                "The POS provider is unavailable right now. Try again shortly.".to_string()
            }
            PosError::NotSupported { operation, provider, .. } => {
                format!("{} is not supported for {}.", operation, provider)
            }
            _ => "An internal error occurred.".to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(PosError::RateLimited { attempts: 5 }.is_retryable());
        assert!(PosError::Http { status: 503, body: String::new() }.is_retryable());

        assert!(!PosError::Http { status: 404, body: String::new() }.is_retryable());
        assert!(!PosError::Config("missing app id".into()).is_retryable());
        assert!(!PosError::AuthFailed { provider: Provider::Square }.is_retryable());
        assert!(!PosError::SignatureInvalid.is_retryable());
    }

    #[test]
    fn test_config_errors_distinct_from_tenant_errors() {
        assert!(PosError::Config("no app id".into()).is_config_error());
        assert!(!PosError::TenantNotFound("t1".into()).is_config_error());
        assert!(!PosError::NotConnected {
            tenant: "t1".into(),
            provider: Provider::Square
        }
        .is_config_error());
    }

    #[test]
    fn test_operator_messages_hide_provider_bodies() {
        let err = PosError::Http {
            status: 500,
            body: "secret internal provider dump".to_string(),
        };
        assert!(!err.operator_message().contains("secret"));
    }

    #[test]
    fn test_uniform_verification_failures() {
        // Signature, state, and tenant-mismatch failures must not reveal
        // which check failed.
        assert_eq!(
            PosError::SignatureInvalid.operator_message(),
            PosError::TenantMismatch.operator_message()
        );
        assert_eq!(
            PosError::SignatureInvalid.operator_message(),
            PosError::InvalidState.operator_message()
        );
    }
}

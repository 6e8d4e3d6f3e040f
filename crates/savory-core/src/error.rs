//! # Error Types
//!
//! Domain-specific error types for savory-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  savory-core errors (this file)                                        │
//! │  └── CoreError        - Parse/normalization failures                   │
//! │                                                                         │
//! │  savory-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  savory-pos errors (separate crate)                                    │
//! │  └── PosError         - Provider/OAuth/webhook failures                │
//! │                                                                         │
//! │  Flow: CoreError → DbError/PosError → operator-facing message          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (provider, raw value, etc.)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Pure-domain errors: parsing and normalization failures.
///
/// These never carry I/O context; the db and integration crates wrap them
/// with their own error types where needed.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A provider name that the platform does not know.
    #[error("Unknown POS provider: {0}")]
    UnknownProvider(String),

    /// A monetary value that could not be normalized to cents.
    #[error("Invalid monetary value: {raw}")]
    InvalidMoney { raw: String },

    /// A required field was absent from a provider payload after trying
    /// every accepted alias.
    #[error("Missing field '{field}' in {provider} payload")]
    MissingField { provider: String, field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnknownProvider("VERIFONE".to_string());
        assert_eq!(err.to_string(), "Unknown POS provider: VERIFONE");

        let err = CoreError::MissingField {
            provider: "CUSTOM".to_string(),
            field: "total".to_string(),
        };
        assert_eq!(err.to_string(), "Missing field 'total' in CUSTOM payload");
    }
}

//! # savory-core: Pure Domain Logic for the Savory POS Integration
//!
//! This crate contains the pure, I/O-free pieces of the POS integration
//! subsystem: domain types, money normalization, the signed OAuth state
//! codec, and the field-alias extraction used by the schema-less custom
//! provider.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Savory POS Integration Architecture                    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Platform Web/API Layer (out of scope)                │   │
//! │  │    webhook routes ──► OAuth routes ──► sync/analytics routes    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 savory-pos (integration engine)                 │   │
//! │  │    adapters • OAuth lifecycle • webhook ingest • sync jobs      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ savory-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │   state   │  │  fields   │  │   │
//! │  │   │ Provider  │  │   Money   │  │ MAC codec │  │  aliases  │  │   │
//! │  │   │ TenantPos │  │ normalize │  │ 10min TTL │  │ first-win │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same input = same output (clock/nonce injectable)
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: provider wire amounts are normalized to cents once
//!    at the boundary; no float arithmetic past that point
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fields;
pub mod money;
pub mod state;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use savory_core::Money` instead of
// `use savory_core::money::Money`

pub use error::{CoreError, CoreResult};
pub use money::Money;
pub use types::*;

//! # Domain Types
//!
//! Core domain types used throughout the POS integration.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   TenantPos     │   │   MenuItem      │   │ ImportedOrder   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  provider       │   │  external_id    │   │  order_number   │       │
//! │  │  merchant_id    │   │  price (cents)  │   │  total (cents)  │       │
//! │  │  credential_blob│   │  metadata (JSON)│   │  external_id    │       │
//! │  │  connected      │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────────────────────────┐     │
//! │  │ ExternalEvent   │   │ ExternalSnapshot                        │     │
//! │  │  ─────────────  │   │  ─────────────                          │     │
//! │  │  idempotency    │   │  last-known-state of one remote object  │     │
//! │  │  ledger row     │   │  keyed (tenant, provider, type, id)     │     │
//! │  └─────────────────┘   └─────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Reconciled entities carry two identities:
//! - `id`: UUID v4 - immutable, used for local relations
//! - `(external_provider, external_id)`: the remote identity, used as the
//!   upsert key so repeated syncs converge instead of duplicating

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::money::Money;

// =============================================================================
// Provider
// =============================================================================

/// The external POS system a tenant is connected to.
///
/// Stored as TEXT in SQLite (`NONE`, `SQUARE`, `TOAST`, `CLOVER`, `CUSTOM`),
/// matching the wire values the platform API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    /// No POS configured for this tenant.
    None,
    /// Square cloud POS (OAuth2 authorization-code flow).
    Square,
    /// Toast (legacy REST, static API key).
    Toast,
    /// Clover (legacy REST, static API key).
    Clover,
    /// Arbitrary tenant-hosted HTTP API with no fixed schema.
    Custom,
}

impl Provider {
    /// Canonical string form, as stored and exposed over the API.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Provider::None => "NONE",
            Provider::Square => "SQUARE",
            Provider::Toast => "TOAST",
            Provider::Clover => "CLOVER",
            Provider::Custom => "CUSTOM",
        }
    }

    /// True when the tenant has selected a real provider.
    pub const fn is_configured(&self) -> bool {
        !matches!(self, Provider::None)
    }

    /// Prefix used to namespace imported order numbers so they can never
    /// collide with natively created orders (`ORD-...`).
    pub const fn order_prefix(&self) -> &'static str {
        match self {
            Provider::Square => "SQ",
            Provider::Toast => "TS",
            Provider::Clover => "CL",
            Provider::Custom => "EXT",
            Provider::None => "EXT",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "" => Ok(Provider::None),
            "SQUARE" => Ok(Provider::Square),
            "TOAST" => Ok(Provider::Toast),
            "CLOVER" => Ok(Provider::Clover),
            "CUSTOM" => Ok(Provider::Custom),
            other => Err(CoreError::UnknownProvider(other.to_string())),
        }
    }
}

impl Default for Provider {
    fn default() -> Self {
        Provider::None
    }
}

// =============================================================================
// Tenant POS Configuration
// =============================================================================

/// The integration subsystem's view of one tenant (restaurant) record.
///
/// ## Invariant
/// `connected == true` implies `credential_blob` decrypts to credentials
/// with a usable access token for `provider`. Only the OAuth lifecycle
/// manager transitions `connected`; everything else signals intent through
/// typed results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TenantPos {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name of the restaurant.
    pub name: String,

    /// ISO currency code used when pushing amounts back to a provider.
    pub currency: String,

    /// Selected POS provider.
    pub provider: Provider,

    /// Remote merchant identifier (set during OAuth callback or manual
    /// configuration for legacy providers).
    pub merchant_id: Option<String>,

    /// Remote location identifier (Square location, Clover merchant outlet).
    pub location_id: Option<String>,

    /// Encrypted-at-rest credential blob. Opaque outside the vault.
    pub credential_blob: Option<String>,

    /// When the current access token expires.
    pub token_expires_at: Option<DateTime<Utc>>,

    /// Whether the tenant currently holds a working connection.
    pub connected: bool,

    /// Marker of the last successful catalog/orders sync.
    pub last_sync_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Credentials
// =============================================================================

/// Decrypted contents of a tenant's credential vault blob.
///
/// The shape is provider-defined: Square fills all token fields, legacy
/// providers store a static API key in `access_token`, and the custom
/// provider additionally carries its `api_base` URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PosCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,

    /// Base URL for the custom provider's API. Unused by the rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl PosCredentials {
    /// A credential set with no usable token (unconfigured tenant).
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no access token is present.
    pub fn is_empty(&self) -> bool {
        self.access_token.as_deref().map_or(true, str::is_empty)
    }
}

// =============================================================================
// Catalog Rows
// =============================================================================

/// A reconciled menu category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MenuCategory {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i64,
    pub is_active: bool,
    /// Remote identity; `Provider::None` for natively created categories.
    pub external_provider: Provider,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reconciled menu item.
///
/// ## Lifecycle
/// Created on first catalog sync, updated in place on later syncs via the
/// `(tenant_id, external_provider, external_id)` key, and marked
/// unavailable (never deleted) when the remote item disappears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MenuItem {
    pub id: String,
    pub tenant_id: String,
    pub category_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: Money,
    pub is_available: bool,
    /// Remote identity; `Provider::None` for natively created items.
    pub external_provider: Provider,
    pub external_id: Option<String>,
    /// Bag of provider-specific fields (e.g. the Square variation id that
    /// backs the priced item), stored as JSON text.
    pub external_metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Order Rows
// =============================================================================

/// Status of an imported order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Payment method recorded for an imported payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type), sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    /// Captured by the provider through a channel we only observe.
    External,
}

impl PaymentMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::External => "EXTERNAL",
        }
    }
}

/// An order reconciled from a remote POS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ImportedOrder {
    pub id: String,
    pub tenant_id: String,
    /// Namespaced per source (`SQ-…`, `TS-…`, `CL-…`, `EXT-…`) so external
    /// imports can never collide with native `ORD-…` numbers.
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal_cents: Money,
    pub tax_cents: Money,
    pub tip_cents: Money,
    pub total_cents: Money,
    pub external_provider: Provider,
    pub external_id: String,
    pub ordered_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One line of an imported order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ImportedLineItem {
    pub id: String,
    pub order_id: String,
    /// Resolved local catalog item, when the remote line could be matched.
    pub menu_item_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: Money,
    pub total_price_cents: Money,
}

/// A payment observed on a remote order in a paid/completed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ImportedPayment {
    pub id: String,
    pub order_id: String,
    pub tenant_id: String,
    pub method: PaymentMethod,
    pub amount_cents: Money,
    pub tip_cents: Money,
    pub transaction_id: Option<String>,
    pub processor: String,
    pub paid_at: DateTime<Utc>,
}

// =============================================================================
// Idempotency Ledger & Snapshots
// =============================================================================

/// One row of the append-only webhook idempotency ledger.
///
/// Created at most once per distinct `(provider, external_event_id)`;
/// a retried delivery of the same id is a no-op. Never updated or deleted
/// by normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ExternalEvent {
    pub id: String,
    pub tenant_id: String,
    pub provider: Provider,
    pub external_event_id: String,
    pub event_type: String,
    /// Raw payload as received, stored as JSON text.
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

/// Last-known-state of one remote object (order, payment, catalog object).
///
/// Upserted whenever a newer representation is observed, via webhook or
/// explicit re-fetch. Not history: the row always holds the most recently
/// *processed* payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ExternalSnapshot {
    pub tenant_id: String,
    pub provider: Provider,
    pub object_type: String,
    pub object_id: String,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Prep Forecast Read Model
// =============================================================================

/// One recipe line: how much of an ingredient one unit of a menu item uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RecipeLine {
    pub menu_item_id: String,
    pub ingredient: String,
    pub quantity_per_unit: f64,
    pub unit: String,
}

/// Current on-hand stock of one ingredient for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct IngredientStock {
    pub tenant_id: String,
    pub ingredient: String,
    pub on_hand: f64,
    pub unit: String,
}

// =============================================================================
// Outbound Order Export
// =============================================================================

/// A local order translated for pushing to a provider.
///
/// The surrounding platform owns native orders; it hands this flattened
/// view to `push_order` so adapters never reach into platform tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExport {
    pub id: String,
    pub lines: Vec<OrderExportLine>,
}

/// One exported order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExportLine {
    /// The provider-side catalog id of the item, when known.
    pub catalog_external_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: Money,
}

/// A payment capture request handed to `process_payment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentExport {
    pub id: String,
    pub order_external_id: Option<String>,
    pub amount_cents: Money,
    pub tip_cents: Money,
    pub currency: String,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_roundtrip() {
        for p in [
            Provider::None,
            Provider::Square,
            Provider::Toast,
            Provider::Clover,
            Provider::Custom,
        ] {
            assert_eq!(p.as_str().parse::<Provider>().unwrap(), p);
        }
        assert_eq!("square".parse::<Provider>().unwrap(), Provider::Square);
        assert!("VERIFONE".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_configured() {
        assert!(!Provider::None.is_configured());
        assert!(Provider::Square.is_configured());
    }

    #[test]
    fn test_order_prefixes_distinct_from_native() {
        // Native orders are numbered ORD-…; every import prefix must differ.
        for p in [Provider::Square, Provider::Toast, Provider::Clover, Provider::Custom] {
            assert_ne!(p.order_prefix(), "ORD");
        }
    }

    #[test]
    fn test_credentials_empty() {
        assert!(PosCredentials::empty().is_empty());

        let creds = PosCredentials {
            access_token: Some("tok".to_string()),
            ..Default::default()
        };
        assert!(!creds.is_empty());

        let blank = PosCredentials {
            access_token: Some(String::new()),
            ..Default::default()
        };
        assert!(blank.is_empty());
    }

    #[test]
    fn test_credentials_serde_skips_absent_fields() {
        let json = serde_json::to_string(&PosCredentials::empty()).unwrap();
        assert_eq!(json, "{}");

        let parsed: PosCredentials = serde_json::from_str(
            r#"{"access_token":"tok","merchant_id":"M1"}"#,
        )
        .unwrap();
        assert_eq!(parsed.access_token.as_deref(), Some("tok"));
        assert_eq!(parsed.merchant_id.as_deref(), Some("M1"));
        assert!(parsed.refresh_token.is_none());
    }
}

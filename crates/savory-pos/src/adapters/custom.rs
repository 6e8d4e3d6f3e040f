//! # Custom Adapter
//!
//! Integration with an arbitrary tenant-hosted HTTP API. There is no fixed
//! schema: every logical field is resolved through an ordered alias table
//! (first present wins), amounts arrive as decimal major units, and
//! unknown menu item names are auto-created as zero-priced placeholder
//! catalog entries to preserve referential integrity.
//!
//! Pushing orders and capturing payments are not supported — with no
//! schema there is nothing to translate into.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{
    reconcile_batch, require_token, PaymentOutcome, PosAdapter, PushOutcome, RemoteLine,
    RemoteOrder, SyncReport,
};
use crate::error::{PosError, PosResult};
use crate::http::ProviderClient;
use async_trait::async_trait;
use savory_core::fields::{aliases, pick_array, pick_bool, pick_i64, pick_id, pick_money, pick_str};
use savory_core::{
    Money, OrderExport, PaymentExport, PaymentMethod, PosCredentials, Provider, TenantPos,
};
use savory_db::{CatalogItemUpsert, Database};

/// Adapter for the custom provider.
pub struct CustomAdapter {
    tenant: TenantPos,
    client: ProviderClient,
    db: Database,
}

impl CustomAdapter {
    /// Builds the adapter; the vault blob must carry both an API key and
    /// the tenant's API base URL.
    pub fn new(tenant: TenantPos, creds: PosCredentials, db: Database) -> PosResult<Self> {
        let token = require_token(&tenant, &creds)?;
        let api_base = creds
            .api_base
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| PosError::NotConnected {
                tenant: tenant.id.clone(),
                provider: Provider::Custom,
            })?;
        let client = ProviderClient::new(Provider::Custom, api_base, token, None)?;
        Ok(CustomAdapter { tenant, client, db })
    }
}

#[async_trait]
impl PosAdapter for CustomAdapter {
    fn provider(&self) -> Provider {
        Provider::Custom
    }

    async fn sync_catalog(&self) -> PosResult<SyncReport> {
        let body = self.client.get("/menu").await?;
        // The list may arrive bare or wrapped under an aliased key.
        let items = body
            .as_array()
            .cloned()
            .or_else(|| pick_array(&body, aliases::MENU_LIST).cloned())
            .unwrap_or_default();

        let catalog = self.db.catalog();
        let mut report = SyncReport::default();

        for item in &items {
            let Some(name) = pick_str(item, aliases::MENU_NAME).map(str::to_string) else {
                warn!(tenant = %self.tenant.id, "Custom menu entry without a name, skipping");
                report.record_skipped();
                continue;
            };
            // Fall back to the name itself when the API exposes no id.
            let external_id = pick_id(item, aliases::MENU_ID)
                .unwrap_or_else(|| format!("name:{}", name));

            let upsert = CatalogItemUpsert {
                tenant_id: self.tenant.id.clone(),
                provider: Provider::Custom,
                external_id,
                name,
                description: pick_str(item, aliases::MENU_DESCRIPTION).map(str::to_string),
                price: pick_money(item, aliases::MENU_PRICE).unwrap_or(Money::zero()),
                is_available: pick_bool(item, aliases::MENU_AVAILABLE).unwrap_or(true),
                category_id: None,
                metadata: None,
            };

            match catalog.upsert_item(&upsert).await {
                Ok(()) => report.record_synced(),
                Err(e) => {
                    warn!(?e, "Failed to upsert custom item, skipping");
                    report.record_skipped();
                }
            }
        }

        debug!(
            tenant = %self.tenant.id,
            synced = report.synced,
            skipped = report.skipped,
            "Custom catalog sync complete"
        );
        Ok(report)
    }

    async fn sync_orders(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> PosResult<SyncReport> {
        let mut path = "/orders".to_string();
        let mut params = Vec::new();
        if let Some(since) = since {
            params.push(format!("since={}", since.to_rfc3339()));
        }
        if let Some(until) = until {
            params.push(format!("until={}", until.to_rfc3339()));
        }
        if !params.is_empty() {
            path = format!("{}?{}", path, params.join("&"));
        }

        let body = self.client.get(&path).await?;
        let orders = body
            .as_array()
            .cloned()
            .or_else(|| pick_array(&body, aliases::ORDER_LIST).cloned())
            .unwrap_or_default();

        let mut remotes = Vec::new();
        let mut malformed = 0u32;
        for order in &orders {
            match map_custom_order(order) {
                Some(remote) => remotes.push(remote),
                None => {
                    warn!(tenant = %self.tenant.id, "Malformed custom order payload, skipping");
                    malformed += 1;
                }
            }
        }

        // Unknown item names become zero-priced placeholders here.
        let mut report =
            reconcile_batch(&self.db, &self.tenant, Provider::Custom, remotes, true).await;
        report.skipped += malformed;
        Ok(report)
    }

    async fn push_order(&self, _order: &OrderExport) -> PosResult<PushOutcome> {
        Ok(PushOutcome::NotSupported {
            reason: "the custom provider exposes no order-creation schema".to_string(),
        })
    }

    async fn process_payment(&self, _payment: &PaymentExport) -> PosResult<PaymentOutcome> {
        Ok(PaymentOutcome::NotSupported {
            reason: "the custom provider exposes no payment capture".to_string(),
        })
    }

    async fn fetch_object(&self, object_type: &str, object_id: &str) -> PosResult<Value> {
        match object_type {
            "order" => self.client.get(&format!("/orders/{}", object_id)).await,
            other => Err(PosError::NotSupported {
                operation: "object re-fetch",
                provider: Provider::Custom,
                reason: format!("unknown object type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Wire Mapping
// =============================================================================

/// Normalizes one custom-provider order through the alias tables.
/// `None` when no id or total can be resolved.
pub(crate) fn map_custom_order(order: &Value) -> Option<RemoteOrder> {
    let external_id = pick_id(order, aliases::ORDER_ID)?;
    let total = pick_money(order, aliases::ORDER_TOTAL)?;
    let tip = pick_money(order, aliases::ORDER_TIP).unwrap_or(Money::zero());

    let lines = pick_array(order, aliases::ORDER_ITEMS)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = pick_str(item, aliases::ITEM_NAME)?.to_string();
                    Some(RemoteLine {
                        catalog_external_id: None,
                        name,
                        quantity: pick_i64(item, aliases::ITEM_QUANTITY).unwrap_or(1).max(1),
                        unit_price: pick_money(item, aliases::ITEM_PRICE)
                            .unwrap_or(Money::zero()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let placed_at = pick_str(order, aliases::ORDER_CREATED)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    // Absent paid markers default to paid: most custom feeds only expose
    // settled orders.
    let paid = pick_bool(order, aliases::ORDER_PAID).unwrap_or(true);

    Some(RemoteOrder {
        external_id,
        total,
        tip,
        subtotal: None,
        lines,
        placed_at,
        closed_at: paid.then_some(placed_at),
        paid,
        method: PaymentMethod::External,
        transaction_id: None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_custom_order_canonical_keys() {
        let order = json!({
            "id": "R1",
            "total": 42.50,
            "items": [
                { "name": "Burger", "qty": 2, "price": 10.00 }
            ]
        });

        let remote = map_custom_order(&order).unwrap();
        assert_eq!(remote.external_id, "R1");
        assert_eq!(remote.total.cents(), 4250);
        assert!(remote.paid);
        assert_eq!(remote.lines.len(), 1);
        assert_eq!(remote.lines[0].name, "Burger");
        assert_eq!(remote.lines[0].quantity, 2);
        assert_eq!(remote.lines[0].unit_price.cents(), 1000);
    }

    #[test]
    fn test_map_custom_order_aliased_keys() {
        let order = json!({
            "order_id": 9917,
            "grand_total": "18.75",
            "line_items": [
                { "item": "Wrap", "count": "3", "amount": "6.25" }
            ],
            "is_paid": "yes",
            "date": "2026-03-02T12:00:00Z"
        });

        let remote = map_custom_order(&order).unwrap();
        assert_eq!(remote.external_id, "9917");
        assert_eq!(remote.total.cents(), 1875);
        assert!(remote.paid);
        assert_eq!(remote.lines[0].name, "Wrap");
        assert_eq!(remote.lines[0].quantity, 3);
        assert_eq!(remote.lines[0].unit_price.cents(), 625);
    }

    #[test]
    fn test_map_custom_order_unpaid_flag() {
        let order = json!({ "id": "R2", "total": 5.0, "paid": false });
        let remote = map_custom_order(&order).unwrap();
        assert!(!remote.paid);
        assert!(remote.closed_at.is_none());
    }

    #[test]
    fn test_map_custom_order_requires_id_and_total() {
        assert!(map_custom_order(&json!({ "total": 5.0 })).is_none());
        assert!(map_custom_order(&json!({ "id": "R1" })).is_none());
        assert!(map_custom_order(&json!("not an object")).is_none());
    }
}

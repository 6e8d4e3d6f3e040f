//! # Square Adapter
//!
//! Cloud POS integration over Square's v2 REST API. Catalog objects arrive
//! as ITEM/CATEGORY pairs where each priced entry is a *variation* of an
//! item; the variation id is the stable external identity and rides along
//! in `external_metadata`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapters::{
    reconcile_batch, require_token, PaymentOutcome, PosAdapter, PushOutcome, RemoteLine,
    RemoteOrder, SyncReport,
};
use crate::config::PosSettings;
use crate::error::PosResult;
use crate::http::ProviderClient;
use async_trait::async_trait;
use savory_core::{
    Money, OrderExport, PaymentExport, PaymentMethod, PosCredentials, Provider, TenantPos,
};
use savory_db::{CatalogItemUpsert, Database};

/// Adapter for Square.
pub struct SquareAdapter {
    tenant: TenantPos,
    client: ProviderClient,
    db: Database,
}

impl SquareAdapter {
    /// Builds the adapter; fails when the tenant holds no usable token.
    pub fn new(
        tenant: TenantPos,
        creds: PosCredentials,
        settings: &PosSettings,
        db: Database,
    ) -> PosResult<Self> {
        let token = require_token(&tenant, &creds)?;
        let client = ProviderClient::new(
            Provider::Square,
            settings.square_base_url(),
            token,
            Some(settings.square_api_version.clone()),
        )?;
        Ok(SquareAdapter { tenant, client, db })
    }

    /// The location used for order search/push: explicit location first,
    /// merchant id as a fallback.
    fn location(&self) -> String {
        self.tenant
            .location_id
            .clone()
            .or_else(|| self.tenant.merchant_id.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PosAdapter for SquareAdapter {
    fn provider(&self) -> Provider {
        Provider::Square
    }

    async fn sync_catalog(&self) -> PosResult<SyncReport> {
        let body = self.client.get("/v2/catalog/list?types=ITEM,CATEGORY").await?;
        let objects = body["objects"].as_array().cloned().unwrap_or_default();

        let catalog = self.db.catalog();
        let mut report = SyncReport::default();

        // Categories first so items can reference their local ids.
        let mut category_ids = std::collections::HashMap::new();
        for object in objects.iter().filter(|o| o["type"] == "CATEGORY") {
            let (Some(external_id), Some(name)) =
                (object["id"].as_str(), object["category_data"]["name"].as_str())
            else {
                report.record_skipped();
                continue;
            };
            match catalog
                .upsert_category(&self.tenant.id, Provider::Square, external_id, name)
                .await
            {
                Ok(local_id) => {
                    category_ids.insert(external_id.to_string(), local_id);
                }
                Err(e) => {
                    warn!(?e, external_id, "Failed to upsert Square category, skipping");
                    report.record_skipped();
                }
            }
        }

        for object in objects.iter().filter(|o| o["type"] == "ITEM") {
            let item_data = &object["item_data"];
            let Some(name) = item_data["name"].as_str() else {
                report.record_skipped();
                continue;
            };
            let category_id = item_data["category_id"]
                .as_str()
                .and_then(|c| category_ids.get(c).cloned());
            let is_deleted = object["is_deleted"].as_bool().unwrap_or(false);

            // One local row per priced variation; the variation id is the
            // stable external identity.
            for variation in item_data["variations"].as_array().into_iter().flatten() {
                let Some(variation_id) = variation["id"].as_str() else {
                    report.record_skipped();
                    continue;
                };
                let amount = variation["item_variation_data"]["price_money"]["amount"]
                    .as_i64()
                    .unwrap_or(0);

                let upsert = CatalogItemUpsert {
                    tenant_id: self.tenant.id.clone(),
                    provider: Provider::Square,
                    external_id: variation_id.to_string(),
                    name: name.to_string(),
                    description: item_data["description"].as_str().map(str::to_string),
                    price: Money::from_minor_units(amount),
                    is_available: !is_deleted,
                    category_id: category_id.clone(),
                    metadata: Some(
                        json!({
                            "item_id": object["id"],
                            "variation_id": variation_id,
                        })
                        .to_string(),
                    ),
                };

                match catalog.upsert_item(&upsert).await {
                    Ok(()) => report.record_synced(),
                    Err(e) => {
                        warn!(?e, variation_id, "Failed to upsert Square item, skipping");
                        report.record_skipped();
                    }
                }
            }
        }

        debug!(
            tenant = %self.tenant.id,
            synced = report.synced,
            skipped = report.skipped,
            "Square catalog sync complete"
        );
        Ok(report)
    }

    async fn sync_orders(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> PosResult<SyncReport> {
        let mut date_filter = serde_json::Map::new();
        if let Some(since) = since {
            date_filter.insert("start_at".to_string(), json!(since.to_rfc3339()));
        }
        if let Some(until) = until {
            date_filter.insert("end_at".to_string(), json!(until.to_rfc3339()));
        }

        let mut query = json!({ "location_ids": [self.location()] });
        if !date_filter.is_empty() {
            query["query"] = json!({
                "filter": { "date_time_filter": { "created_at": date_filter } }
            });
        }

        let body = self.client.post("/v2/orders/search", &query).await?;
        let orders = body["orders"].as_array().cloned().unwrap_or_default();

        let mut remotes = Vec::new();
        let mut malformed = 0u32;
        for order in &orders {
            match map_square_order(order) {
                Some(remote) => remotes.push(remote),
                None => {
                    warn!(tenant = %self.tenant.id, "Malformed Square order payload, skipping");
                    malformed += 1;
                }
            }
        }

        let mut report =
            reconcile_batch(&self.db, &self.tenant, Provider::Square, remotes, false).await;
        report.skipped += malformed;
        Ok(report)
    }

    async fn push_order(&self, order: &OrderExport) -> PosResult<PushOutcome> {
        let line_items: Vec<Value> = order
            .lines
            .iter()
            .map(|line| {
                json!({
                    "quantity": line.quantity.to_string(),
                    "catalog_object_id": line.catalog_external_id,
                    "base_price_money": {
                        "amount": line.unit_price_cents.cents(),
                        "currency": self.tenant.currency,
                    },
                })
            })
            .collect();

        let body = json!({
            // The local order id doubles as the idempotency key: a retried
            // push of the same order cannot double-create remotely.
            "idempotency_key": order.id,
            "order": {
                "location_id": self.location(),
                "line_items": line_items,
            },
        });

        let response = self.client.post("/v2/orders", &body).await?;
        Ok(PushOutcome::Submitted {
            external_id: response["order"]["id"].as_str().map(str::to_string),
        })
    }

    async fn process_payment(&self, _payment: &PaymentExport) -> PosResult<PaymentOutcome> {
        // Square payment creation requires a client-supplied source token
        // (card nonce) that only the buyer-facing surface can produce.
        Ok(PaymentOutcome::NotSupported {
            reason: "Square payments require a client-supplied source token".to_string(),
        })
    }

    async fn fetch_object(&self, object_type: &str, object_id: &str) -> PosResult<Value> {
        let body = match object_type {
            "order" => {
                let body = self.client.get(&format!("/v2/orders/{}", object_id)).await?;
                body["order"].clone()
            }
            "payment" => {
                let body = self.client.get(&format!("/v2/payments/{}", object_id)).await?;
                body["payment"].clone()
            }
            _ => {
                let body = self
                    .client
                    .get(&format!("/v2/catalog/object/{}", object_id))
                    .await?;
                body["object"].clone()
            }
        };
        Ok(body)
    }
}

// =============================================================================
// Wire Mapping
// =============================================================================

/// Normalizes one Square order payload. `None` on malformed records.
pub(crate) fn map_square_order(order: &Value) -> Option<RemoteOrder> {
    let external_id = order["id"].as_str()?.to_string();
    let total = Money::from_minor_units(order["total_money"]["amount"].as_i64().unwrap_or(0));
    let tip = Money::from_minor_units(order["total_tip_money"]["amount"].as_i64().unwrap_or(0));

    let lines = order["line_items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item["name"].as_str()?.to_string();
                    // Square ships quantities as decimal strings ("2").
                    let quantity = match &item["quantity"] {
                        Value::String(s) => s.parse::<f64>().ok()? as i64,
                        Value::Number(n) => n.as_i64()?,
                        _ => 1,
                    };
                    let unit_price = item["base_price_money"]["amount"]
                        .as_i64()
                        .map(Money::from_minor_units)
                        .unwrap_or_default();
                    Some(RemoteLine {
                        catalog_external_id: item["catalog_object_id"]
                            .as_str()
                            .map(str::to_string),
                        name,
                        quantity: quantity.max(1),
                        unit_price,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let placed_at = order["created_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let closed_at = order["closed_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let paid = order["state"].as_str() == Some("COMPLETED");
    let transaction_id = order["tenders"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t["id"].as_str())
        .map(str::to_string);

    Some(RemoteOrder {
        external_id,
        total,
        tip,
        // Square's totals bundle tax/tip adjustments; deriving the subtotal
        // from line totals keeps the local books consistent.
        subtotal: None,
        lines,
        placed_at,
        closed_at,
        paid,
        method: PaymentMethod::Card,
        transaction_id,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn square_order() -> Value {
        json!({
            "id": "SQO-1",
            "state": "COMPLETED",
            "created_at": "2026-03-02T18:30:00Z",
            "closed_at": "2026-03-02T18:45:00Z",
            "total_money": { "amount": 4250, "currency": "USD" },
            "total_tip_money": { "amount": 250, "currency": "USD" },
            "line_items": [
                {
                    "name": "Burger",
                    "quantity": "2",
                    "catalog_object_id": "VAR-1",
                    "base_price_money": { "amount": 1000, "currency": "USD" }
                }
            ],
            "tenders": [ { "id": "TND-1" } ]
        })
    }

    #[test]
    fn test_map_square_order() {
        let remote = map_square_order(&square_order()).unwrap();

        assert_eq!(remote.external_id, "SQO-1");
        assert_eq!(remote.total.cents(), 4250);
        assert_eq!(remote.tip.cents(), 250);
        assert!(remote.paid);
        assert_eq!(remote.transaction_id.as_deref(), Some("TND-1"));

        assert_eq!(remote.lines.len(), 1);
        let line = &remote.lines[0];
        assert_eq!(line.name, "Burger");
        assert_eq!(line.quantity, 2);
        assert_eq!(line.unit_price.cents(), 1000);
        assert_eq!(line.catalog_external_id.as_deref(), Some("VAR-1"));
    }

    #[test]
    fn test_map_square_order_open_state_is_unpaid() {
        let mut order = square_order();
        order["state"] = json!("OPEN");
        let remote = map_square_order(&order).unwrap();
        assert!(!remote.paid);
    }

    #[test]
    fn test_map_square_order_missing_id_is_malformed() {
        let mut order = square_order();
        order.as_object_mut().unwrap().remove("id");
        assert!(map_square_order(&order).is_none());
    }

    #[test]
    fn test_map_square_order_tolerates_missing_lines() {
        let mut order = square_order();
        order.as_object_mut().unwrap().remove("line_items");
        let remote = map_square_order(&order).unwrap();
        assert!(remote.lines.is_empty());
        assert_eq!(remote.total.cents(), 4250);
    }
}

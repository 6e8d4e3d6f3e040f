//! # Toast Adapter
//!
//! Legacy REST integration: a static API key (held in the vault as the
//! access token), menus grouped into `menuGroups`, orders carried as
//! checks with selections. All amounts arrive in cents.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapters::{
    reconcile_batch, require_token, PaymentOutcome, PosAdapter, PushOutcome, RemoteLine,
    RemoteOrder, SyncReport,
};
use crate::error::PosResult;
use crate::http::ProviderClient;
use async_trait::async_trait;
use savory_core::{
    Money, OrderExport, PaymentExport, PaymentMethod, PosCredentials, Provider, TenantPos,
};
use savory_db::{CatalogItemUpsert, Database};

const BASE_URL: &str = "https://api.toasttab.com/v1";

/// Adapter for Toast.
pub struct ToastAdapter {
    tenant: TenantPos,
    client: ProviderClient,
    db: Database,
}

impl ToastAdapter {
    /// Builds the adapter; fails when the tenant holds no API key.
    pub fn new(tenant: TenantPos, creds: PosCredentials, db: Database) -> PosResult<Self> {
        let token = require_token(&tenant, &creds)?;
        let client = ProviderClient::new(Provider::Toast, BASE_URL, token, None)?;
        Ok(ToastAdapter { tenant, client, db })
    }
}

#[async_trait]
impl PosAdapter for ToastAdapter {
    fn provider(&self) -> Provider {
        Provider::Toast
    }

    async fn sync_catalog(&self) -> PosResult<SyncReport> {
        let body = self.client.get("/menus").await?;
        let groups = body["menuGroups"].as_array().cloned().unwrap_or_default();

        let catalog = self.db.catalog();
        let mut report = SyncReport::default();

        for group in &groups {
            let category_id = match (group["guid"].as_str(), group["name"].as_str()) {
                (Some(guid), Some(name)) => catalog
                    .upsert_category(&self.tenant.id, Provider::Toast, guid, name)
                    .await
                    .ok(),
                _ => None,
            };

            for item in group["items"].as_array().into_iter().flatten() {
                let (Some(guid), Some(name)) = (item["guid"].as_str(), item["name"].as_str())
                else {
                    report.record_skipped();
                    continue;
                };

                let upsert = CatalogItemUpsert {
                    tenant_id: self.tenant.id.clone(),
                    provider: Provider::Toast,
                    external_id: guid.to_string(),
                    name: name.to_string(),
                    description: item["description"].as_str().map(str::to_string),
                    price: Money::from_minor_units(item["price"].as_i64().unwrap_or(0)),
                    is_available: item["visibility"].as_str() != Some("HIDDEN"),
                    category_id: category_id.clone(),
                    metadata: None,
                };

                match catalog.upsert_item(&upsert).await {
                    Ok(()) => report.record_synced(),
                    Err(e) => {
                        warn!(?e, guid, "Failed to upsert Toast item, skipping");
                        report.record_skipped();
                    }
                }
            }
        }

        debug!(
            tenant = %self.tenant.id,
            synced = report.synced,
            skipped = report.skipped,
            "Toast catalog sync complete"
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
            params.push(format!("startDate={}", since.to_rfc3339()));
        }
        if let Some(until) = until {
            params.push(format!("endDate={}", until.to_rfc3339()));
        }
        if !params.is_empty() {
            path = format!("{}?{}", path, params.join("&"));
        }

        let body = self.client.get(&path).await?;
        let orders = body["orders"].as_array().cloned().unwrap_or_default();

        let mut remotes = Vec::new();
        let mut malformed = 0u32;
        for order in &orders {
            match map_toast_order(order) {
                Some(remote) => remotes.push(remote),
                None => {
                    warn!(tenant = %self.tenant.id, "Malformed Toast order payload, skipping");
                    malformed += 1;
                }
            }
        }

        let mut report =
            reconcile_batch(&self.db, &self.tenant, Provider::Toast, remotes, false).await;
        report.skipped += malformed;
        Ok(report)
    }

    async fn push_order(&self, order: &OrderExport) -> PosResult<PushOutcome> {
        let selections: Vec<Value> = order
            .lines
            .iter()
            .map(|line| {
                json!({
                    "itemGuid": line.catalog_external_id,
                    "quantity": line.quantity,
                    "price": line.unit_price_cents.cents(),
                })
            })
            .collect();

        let body = json!({
            "guid": order.id,
            "checks": [ { "selections": selections } ],
        });

        let response = self.client.post("/orders", &body).await?;
        Ok(PushOutcome::Submitted {
            external_id: response["guid"].as_str().map(str::to_string),
        })
    }

    async fn process_payment(&self, payment: &PaymentExport) -> PosResult<PaymentOutcome> {
        let body = json!({
            "orderGuid": payment.order_external_id,
            "amount": payment.amount_cents.cents(),
            "tipAmount": payment.tip_cents.cents(),
        });

        let response = self.client.post("/payments", &body).await?;
        let transaction_id = response["guid"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("TOAST_{}", payment.id));
        Ok(PaymentOutcome::Processed { transaction_id })
    }

    async fn fetch_object(&self, object_type: &str, object_id: &str) -> PosResult<Value> {
        match object_type {
            "order" => self.client.get(&format!("/orders/{}", object_id)).await,
            "payment" => self.client.get(&format!("/payments/{}", object_id)).await,
            other => Err(crate::error::PosError::NotSupported {
                operation: "object re-fetch",
                provider: Provider::Toast,
                reason: format!("unknown object type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Wire Mapping
// =============================================================================

/// Normalizes one Toast order payload. `None` on malformed records.
pub(crate) fn map_toast_order(order: &Value) -> Option<RemoteOrder> {
    let external_id = order["guid"].as_str()?.to_string();

    let mut lines = Vec::new();
    let mut total = Money::zero();
    let mut tip = Money::zero();
    for check in order["checks"].as_array().into_iter().flatten() {
        total += Money::from_minor_units(check["amount"].as_i64().unwrap_or(0));
        tip += Money::from_minor_units(check["tipAmount"].as_i64().unwrap_or(0));
        for selection in check["selections"].as_array().into_iter().flatten() {
            let Some(name) = selection["displayName"].as_str() else {
                continue;
            };
            lines.push(RemoteLine {
                catalog_external_id: selection["itemGuid"].as_str().map(str::to_string),
                name: name.to_string(),
                quantity: selection["quantity"].as_i64().unwrap_or(1).max(1),
                unit_price: Money::from_minor_units(selection["price"].as_i64().unwrap_or(0)),
            });
        }
    }

    let placed_at = millis_to_utc(order["openedDate"].as_i64())
        .or_else(|| parse_rfc3339(&order["openedDate"]))
        .unwrap_or_else(Utc::now);
    let closed_at =
        millis_to_utc(order["paidDate"].as_i64()).or_else(|| parse_rfc3339(&order["paidDate"]));

    Some(RemoteOrder {
        external_id,
        total,
        tip,
        subtotal: None,
        lines,
        placed_at,
        closed_at,
        paid: closed_at.is_some(),
        method: PaymentMethod::External,
        transaction_id: None,
    })
}

fn millis_to_utc(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn parse_rfc3339(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn toast_order() -> Value {
        json!({
            "guid": "TO-1",
            "openedDate": "2026-03-02T18:30:00Z",
            "paidDate": "2026-03-02T19:00:00Z",
            "checks": [
                {
                    "amount": 2500,
                    "tipAmount": 300,
                    "selections": [
                        {
                            "displayName": "Club Sandwich",
                            "itemGuid": "ITEM-9",
                            "quantity": 1,
                            "price": 1200
                        },
                        {
                            "displayName": "Iced Tea",
                            "itemGuid": "ITEM-3",
                            "quantity": 2,
                            "price": 400
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_map_toast_order() {
        let remote = map_toast_order(&toast_order()).unwrap();

        assert_eq!(remote.external_id, "TO-1");
        assert_eq!(remote.total.cents(), 2500);
        assert_eq!(remote.tip.cents(), 300);
        assert!(remote.paid);
        assert_eq!(remote.lines.len(), 2);
        assert_eq!(remote.lines[1].quantity, 2);
        assert_eq!(remote.lines[1].unit_price.cents(), 400);
    }

    #[test]
    fn test_map_toast_order_unpaid_without_paid_date() {
        let mut order = toast_order();
        order.as_object_mut().unwrap().remove("paidDate");
        let remote = map_toast_order(&order).unwrap();
        assert!(!remote.paid);
        assert!(remote.closed_at.is_none());
    }

    #[test]
    fn test_map_toast_order_epoch_millis_dates() {
        let mut order = toast_order();
        order["openedDate"] = json!(1_771_950_600_000_i64);
        order["paidDate"] = json!(1_771_952_400_000_i64);
        let remote = map_toast_order(&order).unwrap();
        assert!(remote.paid);
        assert!(remote.closed_at.unwrap() > remote.placed_at);
    }

    #[test]
    fn test_map_toast_order_missing_guid_is_malformed() {
        let mut order = toast_order();
        order.as_object_mut().unwrap().remove("guid");
        assert!(map_toast_order(&order).is_none());
    }
}

//! # Clover Adapter
//!
//! Legacy REST integration: a static API key, merchant-scoped paths
//! (`/merchants/{mid}/...`), cents for amounts, epoch milliseconds for
//! times, and a `hidden` flag for item visibility.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapters::{
    reconcile_batch, require_token, PaymentOutcome, PosAdapter, PushOutcome, RemoteLine,
    RemoteOrder, SyncReport,
};
use crate::error::{PosError, PosResult};
use crate::http::ProviderClient;
use async_trait::async_trait;
use savory_core::{
    Money, OrderExport, PaymentExport, PaymentMethod, PosCredentials, Provider, TenantPos,
};
use savory_db::{CatalogItemUpsert, Database};

const BASE_URL: &str = "https://api.clover.com/v3";

/// Adapter for Clover.
pub struct CloverAdapter {
    tenant: TenantPos,
    merchant_id: String,
    client: ProviderClient,
    db: Database,
}

impl CloverAdapter {
    /// Builds the adapter; fails without an API key or merchant id.
    pub fn new(tenant: TenantPos, creds: PosCredentials, db: Database) -> PosResult<Self> {
        let token = require_token(&tenant, &creds)?;
        let merchant_id = tenant
            .merchant_id
            .clone()
            .or_else(|| creds.merchant_id.clone())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| PosError::NotConnected {
                tenant: tenant.id.clone(),
                provider: Provider::Clover,
            })?;
        let client = ProviderClient::new(Provider::Clover, BASE_URL, token, None)?;
        Ok(CloverAdapter { tenant, merchant_id, client, db })
    }

    fn merchant_path(&self, suffix: &str) -> String {
        format!("/merchants/{}{}", self.merchant_id, suffix)
    }
}

#[async_trait]
impl PosAdapter for CloverAdapter {
    fn provider(&self) -> Provider {
        Provider::Clover
    }

    async fn sync_catalog(&self) -> PosResult<SyncReport> {
        let body = self.client.get(&self.merchant_path("/items")).await?;
        let items = body["elements"].as_array().cloned().unwrap_or_default();

        let catalog = self.db.catalog();
        let mut report = SyncReport::default();

        for item in &items {
            let (Some(id), Some(name)) = (item["id"].as_str(), item["name"].as_str()) else {
                report.record_skipped();
                continue;
            };

            let upsert = CatalogItemUpsert {
                tenant_id: self.tenant.id.clone(),
                provider: Provider::Clover,
                external_id: id.to_string(),
                name: name.to_string(),
                description: item["description"].as_str().map(str::to_string),
                price: Money::from_minor_units(item["price"].as_i64().unwrap_or(0)),
                is_available: !item["hidden"].as_bool().unwrap_or(false),
                category_id: None,
                metadata: None,
            };

            match catalog.upsert_item(&upsert).await {
                Ok(()) => report.record_synced(),
                Err(e) => {
                    warn!(?e, id, "Failed to upsert Clover item, skipping");
                    report.record_skipped();
                }
            }
        }

        debug!(
            tenant = %self.tenant.id,
            synced = report.synced,
            skipped = report.skipped,
            "Clover catalog sync complete"
        );
        Ok(report)
    }

    async fn sync_orders(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> PosResult<SyncReport> {
        let mut path = self.merchant_path("/orders?expand=lineItems");
        if let Some(since) = since {
            path.push_str(&format!("&filter=createdTime>={}", since.timestamp_millis()));
        }
        if let Some(until) = until {
            path.push_str(&format!("&filter=createdTime<={}", until.timestamp_millis()));
        }

        let body = self.client.get(&path).await?;
        let orders = body["elements"].as_array().cloned().unwrap_or_default();

        let mut remotes = Vec::new();
        let mut malformed = 0u32;
        for order in &orders {
            match map_clover_order(order) {
                Some(remote) => remotes.push(remote),
                None => {
                    warn!(tenant = %self.tenant.id, "Malformed Clover order payload, skipping");
                    malformed += 1;
                }
            }
        }

        let mut report =
            reconcile_batch(&self.db, &self.tenant, Provider::Clover, remotes, false).await;
        report.skipped += malformed;
        Ok(report)
    }

    async fn push_order(&self, order: &OrderExport) -> PosResult<PushOutcome> {
        let line_items: Vec<Value> = order
            .lines
            .iter()
            .map(|line| {
                json!({
                    "item": { "id": line.catalog_external_id },
                    "unitQty": line.quantity,
                    "price": line.unit_price_cents.cents(),
                })
            })
            .collect();

        let body = json!({
            "state": "open",
            "lineItems": line_items,
        });

        let response = self.client.post(&self.merchant_path("/orders"), &body).await?;
        Ok(PushOutcome::Submitted {
            external_id: response["id"].as_str().map(str::to_string),
        })
    }

    async fn process_payment(&self, payment: &PaymentExport) -> PosResult<PaymentOutcome> {
        let body = json!({
            "order": { "id": payment.order_external_id },
            "amount": payment.amount_cents.cents(),
            "tipAmount": payment.tip_cents.cents(),
        });

        let response = self.client.post(&self.merchant_path("/payments"), &body).await?;
        let transaction_id = response["id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("CLOVER_{}", payment.id));
        Ok(PaymentOutcome::Processed { transaction_id })
    }

    async fn fetch_object(&self, object_type: &str, object_id: &str) -> PosResult<Value> {
        match object_type {
            "order" => {
                self.client
                    .get(&self.merchant_path(&format!("/orders/{}?expand=lineItems", object_id)))
                    .await
            }
            "payment" => {
                self.client
                    .get(&self.merchant_path(&format!("/payments/{}", object_id)))
                    .await
            }
            other => Err(PosError::NotSupported {
                operation: "object re-fetch",
                provider: Provider::Clover,
                reason: format!("unknown object type '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Wire Mapping
// =============================================================================

/// Normalizes one Clover order payload. `None` on malformed records.
pub(crate) fn map_clover_order(order: &Value) -> Option<RemoteOrder> {
    let external_id = order["id"].as_str()?.to_string();
    let total = Money::from_minor_units(order["total"].as_i64().unwrap_or(0));

    // Line items arrive nested under elements when expanded.
    let lines = order["lineItems"]["elements"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item["name"].as_str()?.to_string();
                    Some(RemoteLine {
                        catalog_external_id: item["item"]["id"].as_str().map(str::to_string),
                        name,
                        quantity: item["unitQty"].as_i64().unwrap_or(1).max(1),
                        unit_price: Money::from_minor_units(item["price"].as_i64().unwrap_or(0)),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let placed_at = order["createdTime"]
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    let closed_at = order["modifiedTime"]
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    // Clover locks an order once tendered.
    let paid = matches!(order["state"].as_str(), Some("locked") | Some("paid"));

    Some(RemoteOrder {
        external_id,
        total,
        tip: Money::zero(),
        subtotal: None,
        lines,
        placed_at,
        closed_at: paid.then_some(closed_at).flatten(),
        paid,
        method: PaymentMethod::External,
        transaction_id: None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

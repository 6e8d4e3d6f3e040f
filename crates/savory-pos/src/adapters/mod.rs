//! # Provider Adapters
//!
//! One adapter per provider, each implementing the same capability set:
//! sync catalog, sync orders, push an order, process a payment.
//!
//! ## Normalization Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   Provider wire format            Common internal shape                 │
//! │                                                                         │
//! │   Square order.total_money ──┐                                          │
//! │   Toast check amounts ───────┼──► RemoteOrder ──► reconcile_order ──►  │
//! │   Clover cents + millis ─────┤    (cents, UTC,     orders/lines/       │
//! │   Custom alias bag ──────────┘     paid flag)      payments tables     │
//! │                                                                         │
//! │   Per-record failures are logged and skipped; a malformed remote       │
//! │   record never aborts the batch. Counts are always returned.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::PosSettings;
use crate::error::{PosError, PosResult};
use savory_core::{
    Money, OrderExport, OrderStatus, PaymentExport, PaymentMethod, Provider, PosCredentials,
    TenantPos,
};
use savory_db::{Database, NewImportedLine, NewImportedOrder, NewImportedPayment};

pub mod clover;
pub mod custom;
pub mod square;
pub mod toast;

pub use clover::CloverAdapter;
pub use custom::CustomAdapter;
pub use square::SquareAdapter;
pub use toast::ToastAdapter;

// =============================================================================
// Capability Results
// =============================================================================

/// Counts returned by a catalog or orders sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncReport {
    /// Records upserted/imported.
    pub synced: u32,
    /// Records skipped (already reconciled, or malformed and logged).
    pub skipped: u32,
}

impl SyncReport {
    pub fn record_synced(&mut self) {
        self.synced += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }
}

/// Result of pushing a local order to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The provider accepted the order.
    Submitted { external_id: Option<String> },
    /// This provider cannot accept pushed orders; nothing was attempted.
    NotSupported { reason: String },
}

/// Result of a payment capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The provider captured the payment.
    Processed { transaction_id: String },
    /// This provider needs something we don't hold (e.g. a client-supplied
    /// payment-source token); nothing was attempted.
    NotSupported { reason: String },
}

// =============================================================================
// Adapter Trait
// =============================================================================

/// The per-provider capability set.
///
/// Implementations normalize their wire formats into the common shapes
/// above; callers never see provider JSON.
#[async_trait]
pub trait PosAdapter: Send + Sync {
    /// Which provider this adapter speaks to.
    fn provider(&self) -> Provider;

    /// Fetches remote categories/items and upserts reconciled catalog rows.
    async fn sync_catalog(&self) -> PosResult<SyncReport>;

    /// Fetches remote orders in a window and imports any not yet
    /// reconciled (with line items, and a payment when paid).
    async fn sync_orders(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> PosResult<SyncReport>;

    /// Translates a local order into the provider's create-order shape and
    /// submits it.
    async fn push_order(&self, order: &OrderExport) -> PosResult<PushOutcome>;

    /// Submits a payment capture.
    async fn process_payment(&self, payment: &PaymentExport) -> PosResult<PaymentOutcome>;

    /// Fetches the canonical representation of one remote object.
    ///
    /// Used by the webhook follow-up path: webhook payloads are often
    /// partial, so order/payment events trigger a targeted re-fetch whose
    /// result replaces the object's snapshot.
    async fn fetch_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> PosResult<serde_json::Value>;
}

/// Builds the adapter for a tenant's provider.
///
/// Returns `None` when the tenant has no provider configured.
pub fn make_adapter(
    tenant: &TenantPos,
    creds: PosCredentials,
    settings: &PosSettings,
    db: Database,
) -> PosResult<Option<Box<dyn PosAdapter>>> {
    let adapter: Box<dyn PosAdapter> = match tenant.provider {
        Provider::None => return Ok(None),
        Provider::Square => {
            Box::new(SquareAdapter::new(tenant.clone(), creds, settings, db)?)
        }
        Provider::Toast => Box::new(ToastAdapter::new(tenant.clone(), creds, db)?),
        Provider::Clover => Box::new(CloverAdapter::new(tenant.clone(), creds, db)?),
        Provider::Custom => Box::new(CustomAdapter::new(tenant.clone(), creds, db)?),
    };
    Ok(Some(adapter))
}

// =============================================================================
// Normalized Remote Order
// =============================================================================

/// A remote order after wire-format normalization, ready to reconcile.
#[derive(Debug, Clone)]
pub struct RemoteOrder {
    pub external_id: String,
    pub total: Money,
    pub tip: Money,
    /// When absent, derived from the line totals.
    pub subtotal: Option<Money>,
    pub lines: Vec<RemoteLine>,
    pub placed_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Whether the remote order is in a paid/completed state.
    pub paid: bool,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
}

/// One normalized remote order line.
#[derive(Debug, Clone)]
pub struct RemoteLine {
    /// The provider's catalog id for the item, when the wire carries one.
    pub catalog_external_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
}

// =============================================================================
// Shared Reconciliation
// =============================================================================

/// Imports one normalized remote order unless it was already reconciled.
///
/// Returns `true` when a local order was created, `false` when skipped.
/// Line items are matched to the reconciled catalog by remote id first and
/// display name second; with `auto_create_items`, unknown names become
/// zero-priced placeholder entries (the custom provider's referential-
/// integrity guarantee).
pub(crate) async fn reconcile_order(
    db: &Database,
    tenant: &TenantPos,
    provider: Provider,
    remote: &RemoteOrder,
    auto_create_items: bool,
) -> PosResult<bool> {
    let orders = db.orders();

    if orders
        .external_order_exists(&tenant.id, provider, &remote.external_id)
        .await?
    {
        debug!(
            tenant = %tenant.id,
            external_id = %remote.external_id,
            "Remote order already reconciled, skipping"
        );
        return Ok(false);
    }

    let catalog = db.catalog();
    let mut lines = Vec::with_capacity(remote.lines.len());
    for line in &remote.lines {
        let mut menu_item_id = None;
        if let Some(external_id) = &line.catalog_external_id {
            menu_item_id = catalog
                .find_item_by_external_id(&tenant.id, provider, external_id)
                .await?
                .map(|item| item.id);
        }
        if menu_item_id.is_none() {
            menu_item_id = catalog
                .find_item_by_name(&tenant.id, &line.name)
                .await?
                .map(|item| item.id);
        }
        if menu_item_id.is_none() && auto_create_items && !line.name.is_empty() {
            let placeholder = catalog
                .insert_placeholder(&tenant.id, provider, &line.name)
                .await?;
            menu_item_id = Some(placeholder.id);
        }

        lines.push(NewImportedLine {
            menu_item_id,
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.unit_price.multiply_quantity(line.quantity),
        });
    }

    let subtotal = remote
        .subtotal
        .unwrap_or_else(|| lines.iter().map(|l| l.total_price).sum());
    let tax = (remote.total - subtotal - remote.tip).max_zero();

    let payment = remote.paid.then(|| NewImportedPayment {
        method: remote.method,
        amount: remote.total,
        tip: remote.tip,
        transaction_id: remote.transaction_id.clone(),
        processor: provider.as_str().to_string(),
    });

    orders
        .insert_imported(&NewImportedOrder {
            tenant_id: tenant.id.clone(),
            provider,
            external_id: remote.external_id.clone(),
            order_number: format!("{}-{}", provider.order_prefix(), remote.external_id),
            status: if remote.paid {
                OrderStatus::Completed
            } else {
                OrderStatus::Pending
            },
            subtotal,
            tax,
            tip: remote.tip,
            total: remote.total,
            ordered_at: remote.placed_at,
            closed_at: remote.closed_at,
            lines,
            payment,
        })
        .await?;

    Ok(true)
}

/// Reconciles a batch of normalized orders, skipping per-record failures.
pub(crate) async fn reconcile_batch(
    db: &Database,
    tenant: &TenantPos,
    provider: Provider,
    remotes: Vec<RemoteOrder>,
    auto_create_items: bool,
) -> SyncReport {
    let mut report = SyncReport::default();
    for remote in remotes {
        match reconcile_order(db, tenant, provider, &remote, auto_create_items).await {
            Ok(true) => report.record_synced(),
            Ok(false) => report.record_skipped(),
            Err(e) => {
                // One malformed/conflicting record never aborts the batch.
                tracing::warn!(
                    tenant = %tenant.id,
                    provider = %provider,
                    external_id = %remote.external_id,
                    error = %e,
                    "Failed to reconcile remote order, skipping"
                );
                report.record_skipped();
            }
        }
    }
    report
}

/// Guard for adapters that need a usable access token before calling out.
pub(crate) fn require_token(tenant: &TenantPos, creds: &PosCredentials) -> PosResult<String> {
    match creds.access_token.as_deref() {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(PosError::NotConnected {
            tenant: tenant.id.clone(),
            provider: tenant.provider,
        }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use savory_db::DbConfig;

    async fn test_db() -> (Database, TenantPos) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();
        let tenant = db.tenants().get_required("t1").await.unwrap();
        (db, tenant)
    }

    fn stub_order() -> RemoteOrder {
        RemoteOrder {
            external_id: "R1".to_string(),
            total: Money::from_major_units(42.50),
            tip: Money::zero(),
            subtotal: None,
            lines: vec![RemoteLine {
                catalog_external_id: None,
                name: "Burger".to_string(),
                quantity: 2,
                unit_price: Money::from_major_units(10.00),
            }],
            placed_at: Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
            closed_at: None,
            paid: true,
            method: PaymentMethod::External,
            transaction_id: None,
        }
    }

    #[tokio::test]
    async fn test_reconcile_creates_order_and_payment_once() {
        let (db, tenant) = test_db().await;

        let created =
            reconcile_order(&db, &tenant, Provider::Custom, &stub_order(), true).await.unwrap();
        assert!(created);

        // Second pass with the same remote order: skipped, no duplicate.
        let created =
            reconcile_order(&db, &tenant, Provider::Custom, &stub_order(), true).await.unwrap();
        assert!(!created);

        assert!(db
            .orders()
            .external_order_exists("t1", Provider::Custom, "R1")
            .await
            .unwrap());

        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let totals = db.orders().daily_totals("t1", date).await.unwrap();
        assert_eq!(totals.order_count, 1);
        assert_eq!(totals.revenue_cents.cents(), 4250);
    }

    #[tokio::test]
    async fn test_reconcile_auto_creates_placeholder_items() {
        let (db, tenant) = test_db().await;

        reconcile_order(&db, &tenant, Provider::Custom, &stub_order(), true).await.unwrap();

        // "Burger" was unknown: a zero-priced placeholder now exists.
        let item = db
            .catalog()
            .find_item_by_name("t1", "Burger")
            .await
            .unwrap()
            .expect("placeholder created");
        assert!(item.price_cents.is_zero());
        assert_eq!(item.external_provider, Provider::Custom);
    }

    #[tokio::test]
    async fn test_reconcile_derives_tax_from_total() {
        let (db, tenant) = test_db().await;

        reconcile_order(&db, &tenant, Provider::Custom, &stub_order(), true).await.unwrap();

        // subtotal = 2 × $10.00 = $20.00, total $42.50 → tax $22.50
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let totals = db.orders().daily_totals("t1", date).await.unwrap();
        assert_eq!(totals.revenue_cents.cents(), 4250);
    }

    #[tokio::test]
    async fn test_unpaid_order_has_no_payment() {
        let (db, tenant) = test_db().await;

        let mut order = stub_order();
        order.paid = false;
        reconcile_order(&db, &tenant, Provider::Custom, &order, true).await.unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let breakdown = db.orders().method_breakdown("t1", date).await.unwrap();
        assert!(breakdown.is_empty());
    }

    #[tokio::test]
    async fn test_batch_skips_failing_records() {
        let (db, tenant) = test_db().await;

        let good = stub_order();
        let mut second = stub_order();
        second.external_id = "R2".to_string();

        let report =
            reconcile_batch(&db, &tenant, Provider::Custom, vec![good.clone(), second], true).await;
        assert_eq!(report, SyncReport { synced: 2, skipped: 0 });

        // Re-running the batch skips both.
        let mut third = stub_order();
        third.external_id = "R3".to_string();
        let report = reconcile_batch(
            &db,
            &tenant,
            Provider::Custom,
            vec![good, third],
            true,
        )
        .await;
        assert_eq!(report, SyncReport { synced: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn test_make_adapter_none_for_unconfigured_tenant() {
        let (db, tenant) = test_db().await;
        let settings = PosSettings::for_tests();

        let adapter =
            make_adapter(&tenant, PosCredentials::empty(), &settings, db).unwrap();
        assert!(adapter.is_none());
    }
}

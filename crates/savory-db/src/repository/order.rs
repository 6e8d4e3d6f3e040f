//! # Order Repository
//!
//! Reconciled order persistence and the read-side aggregates that power
//! sales analytics.
//!
//! ## Import Guarantee
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A remote order is imported AT MOST ONCE.                               │
//! │                                                                         │
//! │  sync_orders ──► external_order_exists? ──yes──► skip                   │
//! │                        │no                                              │
//! │                        ▼                                                │
//! │  BEGIN ── insert order ── insert lines ── insert payment? ── COMMIT     │
//! │                                                                         │
//! │  The unique (tenant, provider, external_id) index backstops the check   │
//! │  when two sync jobs race: the loser's transaction fails and its order   │
//! │  is counted as skipped, not duplicated.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use savory_core::{
    ImportedLineItem, ImportedOrder, ImportedPayment, Money, OrderStatus, PaymentMethod, Provider,
};

// =============================================================================
// Input Shapes
// =============================================================================

/// A remote order normalized by an adapter, ready for import.
#[derive(Debug, Clone)]
pub struct NewImportedOrder {
    pub tenant_id: String,
    pub provider: Provider,
    pub external_id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: Money,
    pub tax: Money,
    pub tip: Money,
    pub total: Money,
    pub ordered_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub lines: Vec<NewImportedLine>,
    pub payment: Option<NewImportedPayment>,
}

/// One normalized order line.
#[derive(Debug, Clone)]
pub struct NewImportedLine {
    pub menu_item_id: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
}

/// A payment observed on a paid/completed remote order.
#[derive(Debug, Clone)]
pub struct NewImportedPayment {
    pub method: PaymentMethod,
    pub amount: Money,
    pub tip: Money,
    pub transaction_id: Option<String>,
    pub processor: String,
}

// =============================================================================
// Aggregate Shapes
// =============================================================================

/// Revenue totals for one calendar day.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyTotals {
    pub revenue_cents: Money,
    pub order_count: i64,
    pub tip_cents: Money,
}

/// Per-payment-method totals for one calendar day.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MethodTotal {
    pub method: String,
    pub payment_count: i64,
    pub total_cents: Money,
}

/// Sales ranking row for one menu item name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemSales {
    pub name: String,
    pub quantity: i64,
    pub revenue_cents: Money,
}

/// Revenue totals over an arbitrary window.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WindowTotals {
    pub revenue_cents: Money,
    pub order_count: i64,
}

/// Quantity sold of one item on one date (prep forecasting input).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemQuantity {
    pub menu_item_id: Option<String>,
    pub name: String,
    pub quantity: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for reconciled orders, lines, and payments.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Checks whether a remote order has already been reconciled.
    pub async fn external_order_exists(
        &self,
        tenant_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders \
             WHERE tenant_id = ?1 AND external_provider = ?2 AND external_id = ?3",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Imports a remote order with its lines and optional payment in one
    /// transaction, returning the new local order id.
    pub async fn insert_imported(&self, order: &NewImportedOrder) -> DbResult<String> {
        let order_id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        debug!(
            tenant = %order.tenant_id,
            provider = %order.provider,
            external_id = %order.external_id,
            total = %order.total,
            "Importing remote order"
        );

        sqlx::query(
            "INSERT INTO orders \
                (id, tenant_id, order_number, status, subtotal_cents, tax_cents, \
                 tip_cents, total_cents, external_provider, external_id, \
                 ordered_at, closed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&order_id)
        .bind(&order.tenant_id)
        .bind(&order.order_number)
        .bind(order.status)
        .bind(order.subtotal)
        .bind(order.tax)
        .bind(order.tip)
        .bind(order.total)
        .bind(order.provider)
        .bind(&order.external_id)
        .bind(order.ordered_at)
        .bind(order.closed_at)
        .execute(&mut *tx)
        .await?;

        for line in &order.lines {
            sqlx::query(
                "INSERT INTO order_line_items \
                    (id, order_id, menu_item_id, name, quantity, \
                     unit_price_cents, total_price_cents) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&order_id)
            .bind(&line.menu_item_id)
            .bind(&line.name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total_price)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(payment) = &order.payment {
            sqlx::query(
                "INSERT INTO payments \
                    (id, order_id, tenant_id, method, amount_cents, tip_cents, \
                     transaction_id, processor, paid_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&order_id)
            .bind(&order.tenant_id)
            .bind(payment.method)
            .bind(payment.amount)
            .bind(payment.tip)
            .bind(&payment.transaction_id)
            .bind(&payment.processor)
            .bind(order.closed_at.unwrap_or(order.ordered_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order_id)
    }

    /// Gets an imported order by its remote identity.
    pub async fn get_by_external_id(
        &self,
        tenant_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> DbResult<Option<ImportedOrder>> {
        let order = sqlx::query_as::<_, ImportedOrder>(
            "SELECT * FROM orders \
             WHERE tenant_id = ?1 AND external_provider = ?2 AND external_id = ?3",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    /// Line items of one order.
    pub async fn lines_for_order(&self, order_id: &str) -> DbResult<Vec<ImportedLineItem>> {
        let lines = sqlx::query_as::<_, ImportedLineItem>(
            "SELECT * FROM order_line_items WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    /// Payments recorded against one order.
    pub async fn payments_for_order(&self, order_id: &str) -> DbResult<Vec<ImportedPayment>> {
        let payments = sqlx::query_as::<_, ImportedPayment>(
            "SELECT * FROM payments WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    // =========================================================================
    // Analytics Reads
    // =========================================================================

    /// Completed-order totals for one calendar day.
    pub async fn daily_totals(&self, tenant_id: &str, date: NaiveDate) -> DbResult<DailyTotals> {
        let totals = sqlx::query_as::<_, DailyTotals>(
            "SELECT \
                COALESCE(SUM(total_cents), 0) AS revenue_cents, \
                COUNT(*) AS order_count, \
                COALESCE(SUM(tip_cents), 0) AS tip_cents \
             FROM orders \
             WHERE tenant_id = ?1 AND status = 'COMPLETED' AND date(ordered_at) = ?2",
        )
        .bind(tenant_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }

    /// Payment-method breakdown for one calendar day.
    pub async fn method_breakdown(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> DbResult<Vec<MethodTotal>> {
        let rows = sqlx::query_as::<_, MethodTotal>(
            "SELECT method, COUNT(*) AS payment_count, \
                    COALESCE(SUM(amount_cents), 0) AS total_cents \
             FROM payments \
             WHERE tenant_id = ?1 AND date(paid_at) = ?2 \
             GROUP BY method \
             ORDER BY total_cents DESC",
        )
        .bind(tenant_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Top-selling item names between two instants, by quantity.
    pub async fn item_sales_between(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<ItemSales>> {
        let rows = sqlx::query_as::<_, ItemSales>(
            "SELECT li.name AS name, \
                    COALESCE(SUM(li.quantity), 0) AS quantity, \
                    COALESCE(SUM(li.total_price_cents), 0) AS revenue_cents \
             FROM order_line_items li \
             JOIN orders o ON o.id = li.order_id \
             WHERE o.tenant_id = ?1 AND o.status = 'COMPLETED' \
               AND o.ordered_at >= ?2 AND o.ordered_at < ?3 \
             GROUP BY li.name \
             ORDER BY quantity DESC, revenue_cents DESC \
             LIMIT ?4",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Completed-order totals over an arbitrary window.
    pub async fn window_totals(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<WindowTotals> {
        let totals = sqlx::query_as::<_, WindowTotals>(
            "SELECT COALESCE(SUM(total_cents), 0) AS revenue_cents, \
                    COUNT(*) AS order_count \
             FROM orders \
             WHERE tenant_id = ?1 AND status = 'COMPLETED' \
               AND ordered_at >= ?2 AND ordered_at < ?3",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }

    /// Per-item quantities sold on one calendar day (prep forecasting).
    pub async fn item_quantities_on_date(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> DbResult<Vec<ItemQuantity>> {
        let rows = sqlx::query_as::<_, ItemQuantity>(
            "SELECT li.menu_item_id AS menu_item_id, li.name AS name, \
                    COALESCE(SUM(li.quantity), 0) AS quantity \
             FROM order_line_items li \
             JOIN orders o ON o.id = li.order_id \
             WHERE o.tenant_id = ?1 AND o.status = 'COMPLETED' \
               AND date(o.ordered_at) = ?2 \
             GROUP BY li.menu_item_id, li.name",
        )
        .bind(tenant_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Number of payments recorded for an order (tests and diagnostics).
    pub async fn payment_count(&self, order_id: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE order_id = ?1")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();
        db
    }

    fn remote_order(external_id: &str, total_cents: i64) -> NewImportedOrder {
        let ordered_at = Utc.with_ymd_and_hms(2026, 3, 2, 18, 30, 0).unwrap();
        NewImportedOrder {
            tenant_id: "t1".to_string(),
            provider: Provider::Square,
            external_id: external_id.to_string(),
            order_number: format!("SQ-{}", external_id),
            status: OrderStatus::Completed,
            subtotal: Money::from_cents(total_cents - 250),
            tax: Money::from_cents(250),
            tip: Money::zero(),
            total: Money::from_cents(total_cents),
            ordered_at,
            closed_at: Some(ordered_at),
            lines: vec![NewImportedLine {
                menu_item_id: None,
                name: "Burger".to_string(),
                quantity: 2,
                unit_price: Money::from_cents(1000),
                total_price: Money::from_cents(2000),
            }],
            payment: Some(NewImportedPayment {
                method: PaymentMethod::Card,
                amount: Money::from_cents(total_cents),
                tip: Money::zero(),
                transaction_id: Some(format!("TXN-{}", external_id)),
                processor: "SQUARE".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_insert_and_exists() {
        let db = test_db().await;
        let repo = db.orders();

        assert!(!repo
            .external_order_exists("t1", Provider::Square, "R1")
            .await
            .unwrap());

        let order_id = repo.insert_imported(&remote_order("R1", 4250)).await.unwrap();
        assert!(repo
            .external_order_exists("t1", Provider::Square, "R1")
            .await
            .unwrap());
        assert_eq!(repo.payment_count(&order_id).await.unwrap(), 1);

        // The full imported shape survives the round trip.
        let order = repo
            .get_by_external_id("t1", Provider::Square, "R1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.id, order_id);
        assert_eq!(order.order_number, "SQ-R1");
        assert_eq!(order.total_cents.cents(), 4250);
        assert_eq!(order.status, OrderStatus::Completed);

        let lines = repo.lines_for_order(&order_id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].name, "Burger");
        assert_eq!(lines[0].total_price_cents.cents(), 2000);

        let payments = repo.payments_for_order(&order_id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].method, PaymentMethod::Card);
        assert_eq!(payments[0].amount_cents.cents(), 4250);
        assert_eq!(payments[0].processor, "SQUARE");
    }

    #[tokio::test]
    async fn test_duplicate_import_rejected_by_unique_index() {
        let db = test_db().await;
        let repo = db.orders();

        repo.insert_imported(&remote_order("R1", 4250)).await.unwrap();

        // Same remote id with a different order number still violates the
        // external identity index.
        let mut dup = remote_order("R1", 4250);
        dup.order_number = "SQ-R1-again".to_string();
        assert!(repo.insert_imported(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_daily_totals() {
        let db = test_db().await;
        let repo = db.orders();

        repo.insert_imported(&remote_order("R1", 4250)).await.unwrap();
        repo.insert_imported(&remote_order("R2", 1000)).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let totals = repo.daily_totals("t1", date).await.unwrap();
        assert_eq!(totals.revenue_cents.cents(), 5250);
        assert_eq!(totals.order_count, 2);

        let empty = repo
            .daily_totals("t1", NaiveDate::from_ymd_opt(2026, 3, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(empty.revenue_cents.cents(), 0);
        assert_eq!(empty.order_count, 0);
    }

    #[tokio::test]
    async fn test_item_sales_ranking() {
        let db = test_db().await;
        let repo = db.orders();

        repo.insert_imported(&remote_order("R1", 4250)).await.unwrap();
        let mut second = remote_order("R2", 500);
        second.lines = vec![NewImportedLine {
            menu_item_id: None,
            name: "Fries".to_string(),
            quantity: 1,
            unit_price: Money::from_cents(500),
            total_price: Money::from_cents(500),
        }];
        repo.insert_imported(&second).await.unwrap();

        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap();
        let ranking = repo.item_sales_between("t1", from, to, 10).await.unwrap();

        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].name, "Burger");
        assert_eq!(ranking[0].quantity, 2);
        assert_eq!(ranking[1].name, "Fries");
    }

    #[tokio::test]
    async fn test_method_breakdown() {
        let db = test_db().await;
        let repo = db.orders();

        repo.insert_imported(&remote_order("R1", 4250)).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let breakdown = repo.method_breakdown("t1", date).await.unwrap();

        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown[0].method, "CARD");
        assert_eq!(breakdown[0].payment_count, 1);
        assert_eq!(breakdown[0].total_cents.cents(), 4250);
    }
}

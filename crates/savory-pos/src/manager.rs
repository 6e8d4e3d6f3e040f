//! # Integration Manager
//!
//! Stateless façade over the adapters and the reconciled store:
//! adapter resolution for a tenant, manual sync triggers, the trusted
//! automation surface, and the read-side sales analytics.
//!
//! ## Analytics Read Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  daily_sales_summary ──┐                                                │
//! │  top_selling_items ────┤                                                │
//! │  sales_trend_analysis ─┼──► reconciled orders/payments ONLY             │
//! │  prep_list_forecast ───┘    (no live provider calls, no retries,       │
//! │                              no idempotency concerns)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::adapters::{make_adapter, PosAdapter, SyncReport};
use crate::config::PosSettings;
use crate::error::{PosError, PosResult};
use crate::oauth::OAuthManager;
use savory_core::TenantPos;
use savory_db::{Database, SnapshotUpsert};

// =============================================================================
// Report Shapes
// =============================================================================
// Monetary fields are decimal major units: these structs mirror the
// platform's JSON API shape and are never fed back into arithmetic.

/// Daily sales summary for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct DailySalesSummary {
    pub date: NaiveDate,
    pub total_revenue: f64,
    pub total_orders: i64,
    pub average_order_value: f64,
    pub total_tips: f64,
    pub payment_methods: Vec<PaymentMethodSummary>,
}

/// One payment method's share of a day.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentMethodSummary {
    pub method: String,
    pub count: i64,
    pub total: f64,
}

/// One row of the top-selling-items ranking.
#[derive(Debug, Clone, Serialize)]
pub struct TopItem {
    pub name: String,
    pub quantity: i64,
    pub revenue: f64,
}

/// Current-vs-prior window comparison with qualitative recommendations.
#[derive(Debug, Clone, Serialize)]
pub struct TrendAnalysis {
    pub window_days: u32,
    pub current_revenue: f64,
    pub previous_revenue: f64,
    /// Percent change; absent when the prior window had no revenue.
    pub revenue_change_pct: Option<f64>,
    pub current_orders: i64,
    pub previous_orders: i64,
    pub current_avg_ticket: f64,
    pub previous_avg_ticket: f64,
    pub ticket_change_pct: Option<f64>,
    pub flags: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Prep-list forecast for one target date.
#[derive(Debug, Clone, Serialize)]
pub struct PrepForecast {
    pub target_date: NaiveDate,
    /// The same-weekday dates the projection averages over.
    pub based_on_dates: Vec<NaiveDate>,
    pub items: Vec<ItemForecast>,
    pub ingredients: Vec<IngredientNeed>,
}

/// Projected sales volume of one menu item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemForecast {
    pub menu_item_id: Option<String>,
    pub name: String,
    pub projected_quantity: f64,
}

/// Projected need for one ingredient vs current stock.
#[derive(Debug, Clone, Serialize)]
pub struct IngredientNeed {
    pub ingredient: String,
    pub unit: String,
    pub projected_need: f64,
    pub on_hand: f64,
    pub shortfall: bool,
}

// =============================================================================
// Integration Manager
// =============================================================================

/// Façade over adapters, lifecycle, and analytics. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IntegrationManager {
    settings: Arc<PosSettings>,
    db: Database,
}

impl IntegrationManager {
    /// Creates a new manager.
    pub fn new(settings: Arc<PosSettings>, db: Database) -> Self {
        IntegrationManager { settings, db }
    }

    /// The OAuth lifecycle manager bound to the same settings and store.
    pub fn oauth(&self) -> OAuthManager {
        OAuthManager::new(self.settings.clone(), self.db.clone())
    }

    /// Resolves the adapter for a tenant, refreshing credentials first.
    ///
    /// `None` when the tenant has no provider configured.
    pub async fn adapter_for(
        &self,
        tenant: &TenantPos,
    ) -> PosResult<Option<Box<dyn PosAdapter>>> {
        if !tenant.provider.is_configured() {
            return Ok(None);
        }
        // Proactive refresh before the call batch; the client itself never
        // refreshes inline on 401.
        let creds = self.oauth().ensure_fresh(tenant).await?;
        make_adapter(tenant, creds, &self.settings, self.db.clone())
    }

    // =========================================================================
    // Manual Sync Triggers
    // =========================================================================

    /// Forces a catalog sync for a tenant.
    pub async fn sync_catalog_now(&self, tenant_id: &str) -> PosResult<SyncReport> {
        let tenant = self.require_tenant(tenant_id).await?;
        let adapter = self.require_adapter(&tenant).await?;

        let result = adapter.sync_catalog().await;
        self.finish_sync(&tenant, result).await
    }

    /// Forces an orders sync for a tenant over an optional window.
    pub async fn sync_orders_now(
        &self,
        tenant_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> PosResult<SyncReport> {
        let tenant = self.require_tenant(tenant_id).await?;
        let adapter = self.require_adapter(&tenant).await?;

        let result = adapter.sync_orders(since, until).await;
        self.finish_sync(&tenant, result).await
    }

    /// Re-fetches one remote object's canonical representation and upserts
    /// its snapshot (webhook payloads are often partial).
    pub async fn refetch_object(
        &self,
        tenant_id: &str,
        object_type: &str,
        object_id: &str,
    ) -> PosResult<()> {
        let tenant = self.require_tenant(tenant_id).await?;
        let adapter = self.require_adapter(&tenant).await?;

        let payload = match adapter.fetch_object(object_type, object_id).await {
            Ok(payload) => payload,
            Err(e) => {
                if e.is_auth_error() {
                    self.oauth().mark_auth_failed(&tenant.id).await;
                }
                return Err(e);
            }
        };

        self.db
            .events()
            .upsert_snapshot(&SnapshotUpsert {
                tenant_id: tenant.id.clone(),
                provider: tenant.provider,
                object_type: object_type.to_string(),
                object_id: object_id.to_string(),
                payload: payload.to_string(),
            })
            .await?;

        info!(
            tenant = %tenant.id,
            object_type,
            object_id,
            "Snapshot refreshed from canonical object"
        );
        Ok(())
    }

    async fn require_tenant(&self, tenant_id: &str) -> PosResult<TenantPos> {
        self.db
            .tenants()
            .get(tenant_id)
            .await?
            .ok_or_else(|| PosError::TenantNotFound(tenant_id.to_string()))
    }

    async fn require_adapter(&self, tenant: &TenantPos) -> PosResult<Box<dyn PosAdapter>> {
        self.adapter_for(tenant).await?.ok_or(PosError::NotConnected {
            tenant: tenant.id.clone(),
            provider: tenant.provider,
        })
    }

    /// Shared sync epilogue: auth failures degrade the tenant through the
    /// lifecycle manager, successes stamp the last-sync marker.
    async fn finish_sync(
        &self,
        tenant: &TenantPos,
        result: PosResult<SyncReport>,
    ) -> PosResult<SyncReport> {
        match result {
            Ok(report) => {
                if let Err(e) = self.db.tenants().touch_last_sync(&tenant.id).await {
                    warn!(?e, tenant = %tenant.id, "Failed to stamp last-sync marker");
                }
                Ok(report)
            }
            Err(e) => {
                if e.is_auth_error() {
                    self.oauth().mark_auth_failed(&tenant.id).await;
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Trusted Automation Surface
    // =========================================================================

    /// Validates the static shared secret presented by the internal
    /// automation caller (`Authorization: Bearer <key>`).
    pub fn verify_agent_key(&self, auth_header: Option<&str>) -> bool {
        let Some(expected) = self.settings.agent_api_key.as_deref().filter(|k| !k.is_empty())
        else {
            // Automation surface disabled when no key is configured.
            return false;
        };
        let Some(header) = auth_header else {
            return false;
        };
        let presented = header.strip_prefix("Bearer ").unwrap_or(header);
        constant_time_eq(presented.as_bytes(), expected.as_bytes())
    }

    // =========================================================================
    // Sales Analytics (reconciled data only)
    // =========================================================================

    /// Revenue, order count, tips, and payment-method breakdown for a day.
    pub async fn daily_sales_summary(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> PosResult<DailySalesSummary> {
        let orders = self.db.orders();
        let totals = orders.daily_totals(tenant_id, date).await?;
        let breakdown = orders.method_breakdown(tenant_id, date).await?;

        let average = if totals.order_count > 0 {
            totals.revenue_cents.to_major_units() / totals.order_count as f64
        } else {
            0.0
        };

        Ok(DailySalesSummary {
            date,
            total_revenue: totals.revenue_cents.to_major_units(),
            total_orders: totals.order_count,
            average_order_value: average,
            total_tips: totals.tip_cents.to_major_units(),
            payment_methods: breakdown
                .into_iter()
                .map(|m| PaymentMethodSummary {
                    method: m.method,
                    count: m.payment_count,
                    total: m.total_cents.to_major_units(),
                })
                .collect(),
        })
    }

    /// Top-selling items over the trailing `days` window.
    pub async fn top_selling_items(
        &self,
        tenant_id: &str,
        days: u32,
        limit: u32,
    ) -> PosResult<Vec<TopItem>> {
        let to = Utc::now();
        let from = to - Duration::days(days as i64);
        let rows = self
            .db
            .orders()
            .item_sales_between(tenant_id, from, to, limit)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| TopItem {
                name: r.name,
                quantity: r.quantity,
                revenue: r.revenue_cents.to_major_units(),
            })
            .collect())
    }

    /// Compares the trailing `days` window against the prior equal-length
    /// window and emits regression flags and recommendations.
    pub async fn sales_trend_analysis(
        &self,
        tenant_id: &str,
        days: u32,
    ) -> PosResult<TrendAnalysis> {
        let now = Utc::now();
        let window = Duration::days(days as i64);
        let orders = self.db.orders();

        let current = orders.window_totals(tenant_id, now - window, now).await?;
        let previous = orders
            .window_totals(tenant_id, now - window - window, now - window)
            .await?;

        let current_revenue = current.revenue_cents.to_major_units();
        let previous_revenue = previous.revenue_cents.to_major_units();
        let current_avg = avg_ticket(current_revenue, current.order_count);
        let previous_avg = avg_ticket(previous_revenue, previous.order_count);

        let revenue_change_pct = pct_change(previous_revenue, current_revenue);
        let ticket_change_pct = pct_change(previous_avg, current_avg);

        let mut flags = Vec::new();
        let mut recommendations = Vec::new();

        match revenue_change_pct {
            Some(change) if change <= -10.0 => {
                flags.push("revenue_regression".to_string());
                recommendations.push(format!(
                    "Revenue is down {:.1}% versus the prior {} days. Review staffing levels and consider a promotion on slower days.",
                    change.abs(),
                    days
                ));
            }
            Some(change) if change >= 10.0 => {
                recommendations.push(format!(
                    "Revenue is up {:.1}% versus the prior {} days. Check ingredient stock levels to keep up with demand.",
                    change, days
                ));
            }
            _ => {}
        }

        if let Some(change) = ticket_change_pct {
            if change <= -5.0 {
                flags.push("ticket_size_regression".to_string());
                recommendations.push(format!(
                    "Average ticket size dropped {:.1}%. Consider combo offers or upsell prompts at checkout.",
                    change.abs()
                ));
            }
        }

        if current.order_count == 0 {
            flags.push("no_sales_data".to_string());
            recommendations.push(
                "No completed orders in the current window. Verify the POS connection and sync status.".to_string(),
            );
        }

        Ok(TrendAnalysis {
            window_days: days,
            current_revenue,
            previous_revenue,
            revenue_change_pct,
            current_orders: current.order_count,
            previous_orders: previous.order_count,
            current_avg_ticket: current_avg,
            previous_avg_ticket: previous_avg,
            ticket_change_pct,
            flags,
            recommendations,
        })
    }

    /// Projects per-item volume for `target_date` from the last four
    /// occurrences of the same weekday, then decomposes into ingredient
    /// needs via recipes and flags shortfalls against current stock.
    pub async fn prep_list_forecast(
        &self,
        tenant_id: &str,
        target_date: NaiveDate,
    ) -> PosResult<PrepForecast> {
        let orders = self.db.orders();

        let based_on_dates: Vec<NaiveDate> = (1..=4)
            .map(|weeks| target_date - Duration::days(7 * weeks))
            .collect();

        // Average quantities per item over the sampled weekdays. Dates with
        // no sales still count toward the denominator.
        let mut totals: HashMap<(Option<String>, String), i64> = HashMap::new();
        for date in &based_on_dates {
            for row in orders.item_quantities_on_date(tenant_id, *date).await? {
                *totals.entry((row.menu_item_id, row.name)).or_insert(0) += row.quantity;
            }
        }

        let mut items: Vec<ItemForecast> = totals
            .into_iter()
            .map(|((menu_item_id, name), quantity)| ItemForecast {
                menu_item_id,
                name,
                projected_quantity: quantity as f64 / based_on_dates.len() as f64,
            })
            .collect();
        items.sort_by(|a, b| {
            b.projected_quantity
                .partial_cmp(&a.projected_quantity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Recipe decomposition: projected item volume × ingredient per unit.
        let recipes = self.db.recipes();
        let mut lines_by_item: HashMap<String, Vec<savory_core::RecipeLine>> = HashMap::new();
        for line in recipes.lines_for_tenant(tenant_id).await? {
            lines_by_item.entry(line.menu_item_id.clone()).or_default().push(line);
        }

        let mut needs: HashMap<String, (f64, String)> = HashMap::new();
        for item in &items {
            let Some(menu_item_id) = &item.menu_item_id else {
                continue;
            };
            for line in lines_by_item.get(menu_item_id).into_iter().flatten() {
                let entry = needs
                    .entry(line.ingredient.clone())
                    .or_insert((0.0, line.unit.clone()));
                entry.0 += item.projected_quantity * line.quantity_per_unit;
            }
        }

        let stock: HashMap<String, f64> = recipes
            .stock_for_tenant(tenant_id)
            .await?
            .into_iter()
            .map(|s| (s.ingredient, s.on_hand))
            .collect();

        let mut ingredients: Vec<IngredientNeed> = needs
            .into_iter()
            .map(|(ingredient, (projected_need, unit))| {
                let on_hand = stock.get(&ingredient).copied().unwrap_or(0.0);
                IngredientNeed {
                    shortfall: projected_need > on_hand,
                    ingredient,
                    unit,
                    projected_need,
                    on_hand,
                }
            })
            .collect();
        ingredients.sort_by(|a, b| a.ingredient.cmp(&b.ingredient));

        Ok(PrepForecast { target_date, based_on_dates, items, ingredients })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn avg_ticket(revenue: f64, orders: i64) -> f64 {
    if orders > 0 {
        revenue / orders as f64
    } else {
        0.0
    }
}

fn pct_change(previous: f64, current: f64) -> Option<f64> {
    if previous > 0.0 {
        Some((current - previous) / previous * 100.0)
    } else {
        None
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// =============================================================================
// Unit Tests
// =============================================================================

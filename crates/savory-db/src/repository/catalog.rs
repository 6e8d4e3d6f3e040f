//! # Catalog Repository
//!
//! Database operations for reconciled menu categories and items.
//!
//! ## Upsert Key
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │            (tenant_id, external_provider, external_id)                  │
//! │                                                                         │
//! │  First sync:   INSERT  → new local row, fresh UUID                      │
//! │  Later syncs:  UPDATE  → price/name/availability refreshed in place    │
//! │  Remote gone:  row stays, is_available = 0 (never deleted)             │
//! │                                                                         │
//! │  Native rows have NULL external_id and are untouched by sync.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use savory_core::{MenuCategory, MenuItem, Money, Provider};

/// Input for a catalog item upsert, produced by provider adapters after
/// wire-format normalization.
#[derive(Debug, Clone)]
pub struct CatalogItemUpsert {
    pub tenant_id: String,
    pub provider: Provider,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub is_available: bool,
    pub category_id: Option<String>,
    /// Provider-specific extras (e.g. Square variation id), JSON text.
    pub metadata: Option<String>,
}

/// Repository for reconciled catalog rows.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Upserts a category by its remote identity, returning the local id.
    pub async fn upsert_category(
        &self,
        tenant_id: &str,
        provider: Provider,
        external_id: &str,
        name: &str,
    ) -> DbResult<String> {
        let now = Utc::now();
        let new_id = Uuid::new_v4().to_string();

        // RETURNING resolves the surviving row id on both insert and update.
        let id: String = sqlx::query_scalar(
            "INSERT INTO menu_categories \
                (id, tenant_id, name, display_order, is_active, \
                 external_provider, external_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, 1, ?4, ?5, ?6, ?6) \
             ON CONFLICT (tenant_id, external_provider, external_id) \
             DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at \
             RETURNING id",
        )
        .bind(&new_id)
        .bind(tenant_id)
        .bind(name)
        .bind(provider)
        .bind(external_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Upserts a menu item by its remote identity.
    pub async fn upsert_item(&self, item: &CatalogItemUpsert) -> DbResult<()> {
        let now = Utc::now();
        let new_id = Uuid::new_v4().to_string();

        debug!(
            tenant = %item.tenant_id,
            provider = %item.provider,
            external_id = %item.external_id,
            "Upserting catalog item"
        );

        sqlx::query(
            "INSERT INTO menu_items \
                (id, tenant_id, category_id, name, description, price_cents, \
                 is_available, external_provider, external_id, external_metadata, \
                 created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11) \
             ON CONFLICT (tenant_id, external_provider, external_id) \
             DO UPDATE SET \
                name = excluded.name, \
                description = excluded.description, \
                price_cents = excluded.price_cents, \
                is_available = excluded.is_available, \
                category_id = excluded.category_id, \
                external_metadata = excluded.external_metadata, \
                updated_at = excluded.updated_at",
        )
        .bind(&new_id)
        .bind(&item.tenant_id)
        .bind(&item.category_id)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price)
        .bind(item.is_available)
        .bind(item.provider)
        .bind(&item.external_id)
        .bind(&item.metadata)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a category by its remote identity.
    pub async fn find_category_by_external_id(
        &self,
        tenant_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> DbResult<Option<MenuCategory>> {
        let category = sqlx::query_as::<_, MenuCategory>(
            "SELECT * FROM menu_categories \
             WHERE tenant_id = ?1 AND external_provider = ?2 AND external_id = ?3",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(category)
    }

    /// Finds an item by display name (custom-provider line matching).
    pub async fn find_item_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> DbResult<Option<MenuItem>> {
        let item = sqlx::query_as::<_, MenuItem>(
            "SELECT * FROM menu_items WHERE tenant_id = ?1 AND name = ?2 LIMIT 1",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Gets an item by its remote identity.
    pub async fn find_item_by_external_id(
        &self,
        tenant_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> DbResult<Option<MenuItem>> {
        let item = sqlx::query_as::<_, MenuItem>(
            "SELECT * FROM menu_items \
             WHERE tenant_id = ?1 AND external_provider = ?2 AND external_id = ?3",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Creates a zero-priced placeholder item for an unknown remote name.
    ///
    /// The custom provider has no catalog ids; auto-creating placeholders
    /// preserves line-item referential integrity during order sync.
    pub async fn insert_placeholder(
        &self,
        tenant_id: &str,
        provider: Provider,
        name: &str,
    ) -> DbResult<MenuItem> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        debug!(tenant = %tenant_id, name = %name, "Creating placeholder catalog item");

        sqlx::query(
            "INSERT INTO menu_items \
                (id, tenant_id, name, price_cents, is_available, \
                 external_provider, external_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, 1, ?4, ?5, ?6, ?6)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(name)
        .bind(provider)
        // Placeholder identity derives from the name so a re-sync of the
        // same unknown item converges on one row.
        .bind(format!("name:{}", name))
        .bind(now)
        .execute(&self.pool)
        .await?;

        let item = sqlx::query_as::<_, MenuItem>("SELECT * FROM menu_items WHERE id = ?1")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        Ok(item)
    }

    /// Counts items synced from a provider (diagnostics and tests).
    pub async fn count_items(&self, tenant_id: &str, provider: Provider) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM menu_items \
             WHERE tenant_id = ?1 AND external_provider = ?2",
        )
        .bind(tenant_id)
        .bind(provider)
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

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();
        db
    }

    fn burger(price: i64) -> CatalogItemUpsert {
        CatalogItemUpsert {
            tenant_id: "t1".to_string(),
            provider: Provider::Square,
            external_id: "ITEM-1".to_string(),
            name: "Burger".to_string(),
            description: None,
            price: Money::from_cents(price),
            is_available: true,
            category_id: None,
            metadata: Some(r#"{"variation_id":"VAR-1"}"#.to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_no_duplicate() {
        let db = test_db().await;
        let repo = db.catalog();

        repo.upsert_item(&burger(1000)).await.unwrap();
        repo.upsert_item(&burger(1000)).await.unwrap();

        assert_eq!(repo.count_items("t1", Provider::Square).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_price_in_place() {
        let db = test_db().await;
        let repo = db.catalog();

        repo.upsert_item(&burger(1000)).await.unwrap();
        let before = repo
            .find_item_by_external_id("t1", Provider::Square, "ITEM-1")
            .await
            .unwrap()
            .unwrap();

        repo.upsert_item(&burger(1250)).await.unwrap();
        let after = repo
            .find_item_by_external_id("t1", Provider::Square, "ITEM-1")
            .await
            .unwrap()
            .unwrap();

        // Same local row, new price
        assert_eq!(before.id, after.id);
        assert_eq!(after.price_cents.cents(), 1250);
        assert_eq!(repo.count_items("t1", Provider::Square).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_category_upsert_returns_stable_id() {
        let db = test_db().await;
        let repo = db.catalog();

        let first = repo
            .upsert_category("t1", Provider::Square, "CAT-1", "Drinks")
            .await
            .unwrap();
        let second = repo
            .upsert_category("t1", Provider::Square, "CAT-1", "Cold Drinks")
            .await
            .unwrap();
        assert_eq!(first, second);

        // The rename stuck.
        let category = repo
            .find_category_by_external_id("t1", Provider::Square, "CAT-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category.name, "Cold Drinks");
        assert!(category.is_active);
    }

    #[tokio::test]
    async fn test_placeholder_item() {
        let db = test_db().await;
        let repo = db.catalog();

        let item = repo
            .insert_placeholder("t1", Provider::Custom, "Mystery Special")
            .await
            .unwrap();
        assert!(item.price_cents.is_zero());
        assert_eq!(item.external_provider, Provider::Custom);

        let found = repo
            .find_item_by_name("t1", "Mystery Special")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, item.id);
    }
}

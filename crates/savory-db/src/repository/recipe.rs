//! # Recipe & Stock Repository
//!
//! Read model for prep-list forecasting: recipe decomposition lines
//! (menu item → ingredient quantities) and current ingredient stock.
//!
//! The kitchen/inventory side of the platform maintains these tables; the
//! integration subsystem only reads them, plus small seed helpers used by
//! tests and fixtures.

use sqlx::SqlitePool;

use crate::error::DbResult;
use savory_core::{IngredientStock, RecipeLine};

/// Repository for recipe lines and ingredient stock.
#[derive(Debug, Clone)]
pub struct RecipeRepository {
    pool: SqlitePool,
}

impl RecipeRepository {
    /// Creates a new RecipeRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecipeRepository { pool }
    }

    /// All recipe lines for a tenant's menu items.
    pub async fn lines_for_tenant(&self, tenant_id: &str) -> DbResult<Vec<RecipeLine>> {
        let rows = sqlx::query_as::<_, RecipeLine>(
            "SELECT rl.menu_item_id, rl.ingredient, rl.quantity_per_unit, rl.unit \
             FROM recipe_lines rl \
             JOIN menu_items mi ON mi.id = rl.menu_item_id \
             WHERE mi.tenant_id = ?1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Current on-hand stock for every ingredient of a tenant.
    pub async fn stock_for_tenant(&self, tenant_id: &str) -> DbResult<Vec<IngredientStock>> {
        let rows = sqlx::query_as::<_, IngredientStock>(
            "SELECT tenant_id, ingredient, on_hand, unit \
             FROM ingredient_stock WHERE tenant_id = ?1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Seeds one recipe line (fixtures and tests).
    pub async fn upsert_line(
        &self,
        menu_item_id: &str,
        ingredient: &str,
        quantity_per_unit: f64,
        unit: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO recipe_lines (menu_item_id, ingredient, quantity_per_unit, unit) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (menu_item_id, ingredient) \
             DO UPDATE SET quantity_per_unit = excluded.quantity_per_unit, \
                           unit = excluded.unit",
        )
        .bind(menu_item_id)
        .bind(ingredient)
        .bind(quantity_per_unit)
        .bind(unit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Seeds one stock row (fixtures and tests).
    pub async fn upsert_stock(
        &self,
        tenant_id: &str,
        ingredient: &str,
        on_hand: f64,
        unit: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO ingredient_stock (tenant_id, ingredient, on_hand, unit) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (tenant_id, ingredient) \
             DO UPDATE SET on_hand = excluded.on_hand, unit = excluded.unit",
        )
        .bind(tenant_id)
        .bind(ingredient)
        .bind(on_hand)
        .bind(unit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use crate::repository::catalog::CatalogItemUpsert;
    use savory_core::{Money, Provider};

    #[tokio::test]
    async fn test_lines_scoped_to_tenant() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();
        db.tenants().create("t2", "Cafe Dos", "USD").await.unwrap();

        db.catalog()
            .upsert_item(&CatalogItemUpsert {
                tenant_id: "t1".to_string(),
                provider: Provider::Square,
                external_id: "ITEM-1".to_string(),
                name: "Burger".to_string(),
                description: None,
                price: Money::from_cents(1000),
                is_available: true,
                category_id: None,
                metadata: None,
            })
            .await
            .unwrap();
        let item = db
            .catalog()
            .find_item_by_external_id("t1", Provider::Square, "ITEM-1")
            .await
            .unwrap()
            .unwrap();

        let repo = db.recipes();
        repo.upsert_line(&item.id, "beef patty", 1.0, "pieces").await.unwrap();
        repo.upsert_line(&item.id, "bun", 1.0, "pieces").await.unwrap();
        repo.upsert_stock("t1", "beef patty", 40.0, "pieces").await.unwrap();

        assert_eq!(repo.lines_for_tenant("t1").await.unwrap().len(), 2);
        assert!(repo.lines_for_tenant("t2").await.unwrap().is_empty());
        assert_eq!(repo.stock_for_tenant("t1").await.unwrap().len(), 1);
    }
}

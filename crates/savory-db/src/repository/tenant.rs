//! # Tenant Repository
//!
//! Database operations for the tenant POS configuration columns.
//!
//! ## Ownership
//! The platform owns tenant lifecycle (creation, naming, billing); this
//! subsystem exclusively owns the `pos_*` columns. The `pos_connected`
//! flag in particular is only written through the OAuth lifecycle manager,
//! which calls down into this repository.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use savory_core::{Provider, TenantPos};

/// Column list shared by every tenant SELECT, aliasing the `pos_*` storage
/// names onto the domain field names.
const TENANT_COLUMNS: &str = "\
    id, name, currency, \
    pos_provider AS provider, \
    pos_merchant_id AS merchant_id, \
    pos_location_id AS location_id, \
    pos_credential_blob AS credential_blob, \
    pos_token_expires_at AS token_expires_at, \
    pos_connected AS connected, \
    pos_last_sync_at AS last_sync_at";

/// Repository for tenant POS configuration.
#[derive(Debug, Clone)]
pub struct TenantRepository {
    pool: SqlitePool,
}

impl TenantRepository {
    /// Creates a new TenantRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TenantRepository { pool }
    }

    /// Inserts a tenant record.
    ///
    /// The platform normally owns tenant creation; this exists for seeding
    /// and tests.
    pub async fn create(&self, id: &str, name: &str, currency: &str) -> DbResult<()> {
        sqlx::query("INSERT INTO tenants (id, name, currency) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(name)
            .bind(currency)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Gets a tenant by id.
    pub async fn get(&self, tenant_id: &str) -> DbResult<Option<TenantPos>> {
        let sql = format!("SELECT {} FROM tenants WHERE id = ?1", TENANT_COLUMNS);
        let tenant = sqlx::query_as::<_, TenantPos>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    /// Gets a tenant by id, erroring when absent.
    pub async fn get_required(&self, tenant_id: &str) -> DbResult<TenantPos> {
        self.get(tenant_id).await?.ok_or(DbError::NotFound {
            entity: "Tenant",
            id: tenant_id.to_string(),
        })
    }

    /// Resolves a tenant from a provider merchant id.
    ///
    /// Used by the global webhook route, where the only tenant hint is the
    /// merchant id embedded in the event payload.
    pub async fn find_by_merchant(
        &self,
        provider: Provider,
        merchant_id: &str,
    ) -> DbResult<Option<TenantPos>> {
        let sql = format!(
            "SELECT {} FROM tenants WHERE pos_provider = ?1 AND pos_merchant_id = ?2",
            TENANT_COLUMNS
        );
        let tenant = sqlx::query_as::<_, TenantPos>(&sql)
            .bind(provider)
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    /// Persists a fresh provider connection after a successful OAuth
    /// exchange (or manual legacy-key configuration): provider, merchant,
    /// location, encrypted credential blob, expiry, `connected = true`.
    pub async fn save_connection(
        &self,
        tenant_id: &str,
        provider: Provider,
        merchant_id: Option<&str>,
        location_id: Option<&str>,
        credential_blob: &str,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        debug!(tenant = %tenant_id, provider = %provider, "Persisting POS connection");
        sqlx::query(
            "UPDATE tenants SET \
                pos_provider = ?2, \
                pos_merchant_id = ?3, \
                pos_location_id = ?4, \
                pos_credential_blob = ?5, \
                pos_token_expires_at = ?6, \
                pos_connected = 1, \
                updated_at = ?7 \
             WHERE id = ?1",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(merchant_id)
        .bind(location_id)
        .bind(credential_blob)
        .bind(token_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces the credential blob and expiry (token refresh path).
    pub async fn save_credential_blob(
        &self,
        tenant_id: &str,
        credential_blob: &str,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE tenants SET \
                pos_credential_blob = ?2, \
                pos_token_expires_at = ?3, \
                updated_at = ?4 \
             WHERE id = ?1",
        )
        .bind(tenant_id)
        .bind(credential_blob)
        .bind(token_expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flips the connected flag.
    ///
    /// Callers outside the OAuth lifecycle manager signal intent with typed
    /// results instead of calling this directly.
    pub async fn set_connected(&self, tenant_id: &str, connected: bool) -> DbResult<()> {
        sqlx::query("UPDATE tenants SET pos_connected = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(tenant_id)
            .bind(connected)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resets the tenant to a fully disconnected state: no provider, no
    /// merchant/location, no credentials, no expiry.
    pub async fn clear_connection(&self, tenant_id: &str) -> DbResult<()> {
        debug!(tenant = %tenant_id, "Clearing POS connection");
        sqlx::query(
            "UPDATE tenants SET \
                pos_provider = 'NONE', \
                pos_merchant_id = NULL, \
                pos_location_id = NULL, \
                pos_credential_blob = NULL, \
                pos_token_expires_at = NULL, \
                pos_connected = 0, \
                updated_at = ?2 \
             WHERE id = ?1",
        )
        .bind(tenant_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records the completion time of a successful sync.
    pub async fn touch_last_sync(&self, tenant_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE tenants SET pos_last_sync_at = ?2 WHERE id = ?1")
            .bind(tenant_id)
            .bind(Utc::now())
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
    use savory_core::Provider;

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();

        repo.create("t1", "Cafe Uno", "USD").await.unwrap();

        let tenant = repo.get_required("t1").await.unwrap();
        assert_eq!(tenant.provider, Provider::None);
        assert!(!tenant.connected);
        assert!(tenant.credential_blob.is_none());

        repo.save_connection("t1", Provider::Square, Some("M1"), Some("L1"), "blob", None)
            .await
            .unwrap();

        let tenant = repo.get_required("t1").await.unwrap();
        assert_eq!(tenant.provider, Provider::Square);
        assert!(tenant.connected);
        assert_eq!(tenant.merchant_id.as_deref(), Some("M1"));
        assert_eq!(tenant.credential_blob.as_deref(), Some("blob"));

        repo.clear_connection("t1").await.unwrap();
        let tenant = repo.get_required("t1").await.unwrap();
        assert_eq!(tenant.provider, Provider::None);
        assert!(!tenant.connected);
        assert!(tenant.merchant_id.is_none());
        assert!(tenant.location_id.is_none());
        assert!(tenant.token_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_find_by_merchant() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.tenants();

        repo.create("t1", "Cafe Uno", "USD").await.unwrap();
        repo.save_connection("t1", Provider::Square, Some("M-42"), None, "blob", None)
            .await
            .unwrap();

        let found = repo
            .find_by_merchant(Provider::Square, "M-42")
            .await
            .unwrap()
            .expect("tenant resolved by merchant id");
        assert_eq!(found.id, "t1");

        assert!(repo
            .find_by_merchant(Provider::Square, "M-unknown")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find_by_merchant(Provider::Clover, "M-42")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_tenant_errors() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db.tenants().get_required("ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}

//! # External Event & Snapshot Repository
//!
//! The idempotency ledger and object snapshot store behind webhook ingest.
//!
//! ## Idempotency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Delivery 1 of event E ──► INSERT OR IGNORE ──► 1 row written ──► work  │
//! │  Delivery 2 of event E ──► INSERT OR IGNORE ──► 0 rows written ──► noop │
//! │  Delivery N of event E ──► INSERT OR IGNORE ──► 0 rows written ──► noop │
//! │                                                                         │
//! │  The ledger is append-only: rows are never updated or deleted by        │
//! │  normal operation.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use savory_core::{ExternalEvent, ExternalSnapshot, Provider};

/// Input for a ledger insert.
#[derive(Debug, Clone)]
pub struct NewExternalEvent {
    pub tenant_id: String,
    pub provider: Provider,
    pub external_event_id: String,
    pub event_type: String,
    /// Raw payload as received, JSON text.
    pub payload: String,
}

/// Input for a snapshot upsert.
#[derive(Debug, Clone)]
pub struct SnapshotUpsert {
    pub tenant_id: String,
    pub provider: Provider,
    pub object_type: String,
    pub object_id: String,
    pub payload: String,
}

/// Repository for the event ledger and snapshot table.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    /// Creates a new EventRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EventRepository { pool }
    }

    /// Inserts a ledger row unless the event id was already recorded.
    ///
    /// Returns `true` when a row was written (first delivery) and `false`
    /// on a duplicate delivery.
    pub async fn insert_if_absent(&self, event: &NewExternalEvent) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO external_events \
                (id, tenant_id, provider, external_event_id, event_type, \
                 payload, received_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&event.tenant_id)
        .bind(event.provider)
        .bind(&event.external_event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(
                provider = %event.provider,
                event_id = %event.external_event_id,
                "Duplicate webhook delivery ignored"
            );
        }
        Ok(inserted)
    }

    /// Upserts the last-known-state of one remote object.
    ///
    /// Last-write-wins by processing time; concurrent upserts for the same
    /// key converge on whichever payload lands last.
    pub async fn upsert_snapshot(&self, snapshot: &SnapshotUpsert) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO external_snapshots \
                (tenant_id, provider, object_type, object_id, payload, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (tenant_id, provider, object_type, object_id) \
             DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(&snapshot.tenant_id)
        .bind(snapshot.provider)
        .bind(&snapshot.object_type)
        .bind(&snapshot.object_id)
        .bind(&snapshot.payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetches the most recently updated snapshots for a tenant, optionally
    /// filtered by object type. Limit is capped at 200.
    pub async fn latest_snapshots(
        &self,
        tenant_id: &str,
        provider: Provider,
        object_type: Option<&str>,
        limit: u32,
    ) -> DbResult<Vec<ExternalSnapshot>> {
        let limit = limit.clamp(1, 200);
        let rows = match object_type {
            Some(object_type) => {
                sqlx::query_as::<_, ExternalSnapshot>(
                    "SELECT * FROM external_snapshots \
                     WHERE tenant_id = ?1 AND provider = ?2 AND object_type = ?3 \
                     ORDER BY updated_at DESC LIMIT ?4",
                )
                .bind(tenant_id)
                .bind(provider)
                .bind(object_type)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExternalSnapshot>(
                    "SELECT * FROM external_snapshots \
                     WHERE tenant_id = ?1 AND provider = ?2 \
                     ORDER BY updated_at DESC LIMIT ?3",
                )
                .bind(tenant_id)
                .bind(provider)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Gets one snapshot by key.
    pub async fn get_snapshot(
        &self,
        tenant_id: &str,
        provider: Provider,
        object_type: &str,
        object_id: &str,
    ) -> DbResult<Option<ExternalSnapshot>> {
        let row = sqlx::query_as::<_, ExternalSnapshot>(
            "SELECT * FROM external_snapshots \
             WHERE tenant_id = ?1 AND provider = ?2 AND object_type = ?3 AND object_id = ?4",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(object_type)
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Most recently received ledger rows for a tenant (diagnostics and
    /// the admin event log). Limit is capped at 200.
    pub async fn recent_events(
        &self,
        tenant_id: &str,
        provider: Provider,
        limit: u32,
    ) -> DbResult<Vec<ExternalEvent>> {
        let limit = limit.clamp(1, 200);
        let rows = sqlx::query_as::<_, ExternalEvent>(
            "SELECT * FROM external_events \
             WHERE tenant_id = ?1 AND provider = ?2 \
             ORDER BY received_at DESC LIMIT ?3",
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ledger row count for a tenant (tests and diagnostics).
    pub async fn event_count(&self, tenant_id: &str, provider: Provider) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM external_events WHERE tenant_id = ?1 AND provider = ?2",
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

    fn event(event_id: &str) -> NewExternalEvent {
        NewExternalEvent {
            tenant_id: "t1".to_string(),
            provider: Provider::Square,
            external_event_id: event_id.to_string(),
            event_type: "order.created".to_string(),
            payload: r#"{"event_id":"E1"}"#.to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let db = test_db().await;
        let repo = db.events();

        assert!(repo.insert_if_absent(&event("E1")).await.unwrap());
        assert!(!repo.insert_if_absent(&event("E1")).await.unwrap());
        assert!(!repo.insert_if_absent(&event("E1")).await.unwrap());

        assert_eq!(repo.event_count("t1", Provider::Square).await.unwrap(), 1);

        // A distinct event id is a fresh row.
        assert!(repo.insert_if_absent(&event("E2")).await.unwrap());
        assert_eq!(repo.event_count("t1", Provider::Square).await.unwrap(), 2);

        let events = repo.recent_events("t1", Provider::Square, 50).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "order.created");
        assert!(events.iter().any(|e| e.external_event_id == "E1"));
    }

    #[tokio::test]
    async fn test_snapshot_last_write_wins() {
        let db = test_db().await;
        let repo = db.events();

        let mut snap = SnapshotUpsert {
            tenant_id: "t1".to_string(),
            provider: Provider::Square,
            object_type: "order".to_string(),
            object_id: "R1".to_string(),
            payload: r#"{"state":"OPEN"}"#.to_string(),
        };
        repo.upsert_snapshot(&snap).await.unwrap();

        snap.payload = r#"{"state":"COMPLETED"}"#.to_string();
        repo.upsert_snapshot(&snap).await.unwrap();

        let stored = repo
            .get_snapshot("t1", Provider::Square, "order", "R1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.payload.contains("COMPLETED"));

        let all = repo
            .latest_snapshots("t1", Provider::Square, None, 50)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_snapshots_type_filter() {
        let db = test_db().await;
        let repo = db.events();

        for (object_type, object_id) in [("order", "R1"), ("payment", "P1")] {
            repo.upsert_snapshot(&SnapshotUpsert {
                tenant_id: "t1".to_string(),
                provider: Provider::Square,
                object_type: object_type.to_string(),
                object_id: object_id.to_string(),
                payload: "{}".to_string(),
            })
            .await
            .unwrap();
        }

        let orders = repo
            .latest_snapshots("t1", Provider::Square, Some("order"), 50)
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].object_id, "R1");
    }
}

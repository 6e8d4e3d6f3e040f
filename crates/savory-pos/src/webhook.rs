//! # Webhook Verifier & Ingestor
//!
//! Verifies inbound provider events, records them exactly-once, snapshots
//! the referenced remote object, and enqueues follow-up work.
//!
//! ## Ingest Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  raw body + signature header (+ optional tenant from the route)         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  1. resolve notification URL        missing → Configuration (500)       │
//! │  2. HMAC-SHA256(url ‖ body), b64,   mismatch → Unauthorized (401)       │
//! │     constant-time compare                                               │
//! │  3. parse body                      garbage  → Malformed (400)          │
//! │  4. resolve tenant                  merchant ≠ route tenant → Forbidden │
//! │     (route tenant, or merchant id)  unknown merchant → UnknownTenant    │
//! │  5. ledger insert-if-absent         duplicate → Accepted no-op (2xx!)   │
//! │  6. snapshot upsert                                                     │
//! │  7. enqueue follow-up job           catalog.* → CatalogSync             │
//! │                                     order/payment → RefetchObject       │
//! │                                                                         │
//! │  Nothing after step 2 runs without a valid signature, and rejection    │
//! │  never reveals whether a tenant or merchant exists.                    │
//! │                                                                         │
//! │  This path runs on the request thread and must return quickly: it      │
//! │  never performs a remote call. Remote work rides the job queue.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::PosSettings;
use crate::jobs::{JobQueue, SyncJob};
use savory_core::Provider;
use savory_db::{Database, NewExternalEvent, SnapshotUpsert};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The delivery was processed (or recognized as a duplicate and
    /// no-opped). Either way the provider must receive success, to stop
    /// its retry loop.
    Accepted { duplicate: bool },

    /// The delivery was permanently rejected.
    Rejected(RejectReason),

    /// A transient store failure prevented recording the event. The HTTP
    /// boundary responds 503 so the provider redelivers later.
    Deferred,
}

/// Why a delivery was rejected. The HTTP boundary maps these to status
/// codes; the response body stays uniform to avoid leaking which check
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// This deployment cannot verify webhooks (missing URL template or
    /// signing secret) — an operator problem, not a sender problem.
    Configuration,
    /// Signature mismatch.
    Unauthorized,
    /// Valid signature, but the event belongs to a different tenant than
    /// the route claims.
    Forbidden,
    /// No tenant matches the event's merchant.
    UnknownTenant,
    /// The body is not parseable JSON.
    Malformed,
}

impl RejectReason {
    /// HTTP-equivalent status for the web boundary.
    pub const fn http_status(&self) -> u16 {
        match self {
            RejectReason::Configuration => 500,
            RejectReason::Unauthorized => 401,
            RejectReason::Forbidden => 403,
            RejectReason::UnknownTenant => 404,
            RejectReason::Malformed => 400,
        }
    }
}

// =============================================================================
// Signature Verification
// =============================================================================

/// Verifies a provider webhook signature: base64(HMAC-SHA256(key,
/// notification_url ‖ raw_body)) against the supplied header, in constant
/// time.
pub fn verify_signature(
    signature_key: &str,
    notification_url: &str,
    raw_body: &[u8],
    signature_header: &str,
) -> bool {
    if signature_key.is_empty() || signature_header.is_empty() {
        return false;
    }
    let Ok(supplied) = BASE64.decode(signature_header.trim()) else {
        return false;
    };

    // HMAC accepts keys of any length; new_from_slice cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(signature_key.as_bytes()) else {
        return false;
    };
    mac.update(notification_url.as_bytes());
    mac.update(raw_body);
    mac.verify_slice(&supplied).is_ok()
}

/// Computes the signature header value for a payload (tests, and the
/// outbound notification simulator in fixtures).
pub fn compute_signature(signature_key: &str, notification_url: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signature_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(notification_url.as_bytes());
    mac.update(raw_body);
    BASE64.encode(mac.finalize().into_bytes())
}

// =============================================================================
// Ingestor
// =============================================================================

/// Webhook verifier and ingestor for provider event deliveries.
#[derive(Debug, Clone)]
pub struct WebhookIngestor {
    settings: Arc<PosSettings>,
    db: Database,
    jobs: JobQueue,
}

impl WebhookIngestor {
    /// Creates a new ingestor.
    pub fn new(settings: Arc<PosSettings>, db: Database, jobs: JobQueue) -> Self {
        WebhookIngestor { settings, db, jobs }
    }

    /// Processes one delivery. See the module docs for the pipeline.
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature_header: &str,
        declared_tenant: Option<&str>,
    ) -> IngestOutcome {
        // 1. Without a notification URL the expected signature is
        //    uncomputable: a deployment problem.
        let notification_url = match self.settings.notification_url(declared_tenant) {
            Ok(url) => url,
            Err(_) => {
                warn!("Webhook received but no notification URL is configured");
                return IngestOutcome::Rejected(RejectReason::Configuration);
            }
        };
        if self.settings.webhook_signature_key.is_empty() {
            warn!("Webhook received but no signature key is configured");
            return IngestOutcome::Rejected(RejectReason::Configuration);
        }

        // 2. Authenticity first; everything below trusts the payload.
        if !verify_signature(
            &self.settings.webhook_signature_key,
            &notification_url,
            raw_body,
            signature_header,
        ) {
            warn!("Webhook signature verification failed");
            return IngestOutcome::Rejected(RejectReason::Unauthorized);
        }

        // 3. Parse.
        let payload: Value = match serde_json::from_slice(raw_body) {
            Ok(payload) => payload,
            Err(_) => return IngestOutcome::Rejected(RejectReason::Malformed),
        };

        // 4. Tenant resolution and cross-check.
        let merchant_id = extract_merchant_id(&payload);
        let tenant = match declared_tenant {
            Some(tenant_id) => {
                let Ok(Some(tenant)) = self.db.tenants().get(tenant_id).await else {
                    return IngestOutcome::Rejected(RejectReason::UnknownTenant);
                };
                // Cross-tenant injection defence: the event's merchant must
                // match the route's tenant even with a valid signature.
                if let (Some(event_merchant), Some(stored)) =
                    (merchant_id.as_deref(), tenant.merchant_id.as_deref())
                {
                    if !stored.is_empty() && event_merchant != stored {
                        warn!(
                            tenant = %tenant_id,
                            "Webhook merchant does not match route tenant"
                        );
                        return IngestOutcome::Rejected(RejectReason::Forbidden);
                    }
                }
                tenant
            }
            None => {
                let Some(merchant) = merchant_id.as_deref() else {
                    return IngestOutcome::Rejected(RejectReason::UnknownTenant);
                };
                match self
                    .db
                    .tenants()
                    .find_by_merchant(Provider::Square, merchant)
                    .await
                {
                    Ok(Some(tenant)) => tenant,
                    _ => return IngestOutcome::Rejected(RejectReason::UnknownTenant),
                }
            }
        };

        // 5. Idempotency ledger. The provider's event id when present;
        //    a content hash otherwise.
        let event_type = payload["type"].as_str().unwrap_or_default().to_string();
        let event_id = payload["event_id"]
            .as_str()
            .or_else(|| payload["eventId"].as_str())
            .or_else(|| payload["id"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| hex::encode(Sha256::digest(raw_body)));

        let inserted = match self
            .db
            .events()
            .insert_if_absent(&NewExternalEvent {
                tenant_id: tenant.id.clone(),
                provider: Provider::Square,
                external_event_id: event_id.clone(),
                event_type: event_type.clone(),
                payload: payload.to_string(),
            })
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                // Claiming success here would stop the provider's retry
                // loop and lose the event.
                warn!(?e, "Ledger insert failed, deferring to provider redelivery");
                return IngestOutcome::Deferred;
            }
        };

        if !inserted {
            debug!(event_id = %event_id, "Duplicate delivery acknowledged");
            return IngestOutcome::Accepted { duplicate: true };
        }

        // 6. Snapshot the referenced object when the event names one.
        let object_type = payload["data"]["type"].as_str().unwrap_or_default().to_string();
        let object_id = payload["data"]["id"].as_str().unwrap_or_default().to_string();
        if !object_type.is_empty() && !object_id.is_empty() {
            let object_payload = if payload["data"]["object"].is_object() {
                payload["data"]["object"].to_string()
            } else {
                payload.to_string()
            };
            if let Err(e) = self
                .db
                .events()
                .upsert_snapshot(&SnapshotUpsert {
                    tenant_id: tenant.id.clone(),
                    provider: Provider::Square,
                    object_type: object_type.clone(),
                    object_id: object_id.clone(),
                    payload: object_payload,
                })
                .await
            {
                warn!(?e, "Snapshot upsert failed, follow-up job will repair");
            }
        }

        // 7. Follow-up work on the async boundary. Failures to enqueue
        //    don't fail ingestion: the event is in the ledger and later
        //    syncs converge.
        let follow_up = if event_type.starts_with("catalog.") {
            Some(SyncJob::CatalogSync { tenant_id: tenant.id.clone() })
        } else if object_type == "order" || object_type == "payment" {
            Some(SyncJob::RefetchObject {
                tenant_id: tenant.id.clone(),
                object_type: object_type.clone(),
                object_id: object_id.clone(),
            })
        } else {
            None
        };
        if let Some(job) = follow_up {
            if let Err(e) = self.jobs.enqueue(job).await {
                warn!(?e, "Failed to enqueue follow-up job");
            }
        }

        info!(
            tenant = %tenant.id,
            event_type = %event_type,
            event_id = %event_id,
            "Webhook event ingested"
        );
        IngestOutcome::Accepted { duplicate: false }
    }
}

/// Merchant id extraction across the payload variants providers send.
fn extract_merchant_id(payload: &Value) -> Option<String> {
    payload["merchant_id"]
        .as_str()
        .or_else(|| payload["merchantId"].as_str())
        .or_else(|| payload["data"]["object"]["merchant_id"].as_str())
        .map(str::to_string)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use savory_db::DbConfig;
    use serde_json::json;
    use tokio::sync::mpsc;

    const KEY: &str = "whsec-test-key";
    const GLOBAL_URL: &str = "https://api.savory.test/pos/webhooks";

    async fn setup() -> (WebhookIngestor, Database, mpsc::Receiver<SyncJob>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().create("t1", "Cafe Uno", "USD").await.unwrap();
        db.tenants()
            .save_connection("t1", Provider::Square, Some("M1"), Some("L1"), "blob", None)
            .await
            .unwrap();

        let (queue, rx) = JobQueue::bounded();
        let ingestor =
            WebhookIngestor::new(Arc::new(PosSettings::for_tests()), db.clone(), queue);
        (ingestor, db, rx)
    }

    fn order_event() -> Vec<u8> {
        json!({
            "event_id": "E1",
            "merchant_id": "M1",
            "type": "order.created",
            "data": {
                "type": "order",
                "id": "R1",
                "object": { "id": "R1", "state": "OPEN" }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_signature_roundtrip_and_tamper() {
        let body = b"{\"event_id\":\"E1\"}";
        let signature = compute_signature(KEY, GLOBAL_URL, body);

        assert!(verify_signature(KEY, GLOBAL_URL, body, &signature));
        // Any mutation of body, url, key, or header fails.
        assert!(!verify_signature(KEY, GLOBAL_URL, b"{\"event_id\":\"E2\"}", &signature));
        assert!(!verify_signature(KEY, "https://evil.test", body, &signature));
        assert!(!verify_signature("other-key", GLOBAL_URL, body, &signature));
        assert!(!verify_signature(KEY, GLOBAL_URL, body, "AAAA"));
        assert!(!verify_signature(KEY, GLOBAL_URL, body, ""));
    }

    #[tokio::test]
    async fn test_ingest_records_event_snapshot_and_job() {
        let (ingestor, db, mut rx) = setup().await;
        let body = order_event();
        let signature = compute_signature(KEY, GLOBAL_URL, &body);

        let outcome = ingestor.ingest(&body, &signature, None).await;
        assert_eq!(outcome, IngestOutcome::Accepted { duplicate: false });

        // Ledger row written
        assert_eq!(db.events().event_count("t1", Provider::Square).await.unwrap(), 1);

        // Snapshot reflects the embedded object
        let snapshot = db
            .events()
            .get_snapshot("t1", Provider::Square, "order", "R1")
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.payload.contains("OPEN"));

        // Targeted re-fetch job enqueued
        let job = rx.recv().await.unwrap();
        assert_eq!(
            job,
            SyncJob::RefetchObject {
                tenant_id: "t1".to_string(),
                object_type: "order".to_string(),
                object_id: "R1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_accepted_as_noop() {
        let (ingestor, db, mut rx) = setup().await;
        let body = order_event();
        let signature = compute_signature(KEY, GLOBAL_URL, &body);

        assert_eq!(
            ingestor.ingest(&body, &signature, None).await,
            IngestOutcome::Accepted { duplicate: false }
        );
        for _ in 0..3 {
            assert_eq!(
                ingestor.ingest(&body, &signature, None).await,
                IngestOutcome::Accepted { duplicate: true }
            );
        }

        // Exactly one ledger row and one follow-up job
        assert_eq!(db.events().event_count("t1", Provider::Square).await.unwrap(), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tampered_body_rejected_uniformly() {
        let (ingestor, db, _rx) = setup().await;
        let body = order_event();
        let signature = compute_signature(KEY, GLOBAL_URL, &body);

        let mut tampered = body.clone();
        let last = tampered.len() - 2;
        tampered[last] = b'X';

        assert_eq!(
            ingestor.ingest(&tampered, &signature, None).await,
            IngestOutcome::Rejected(RejectReason::Unauthorized)
        );
        assert_eq!(
            ingestor.ingest(&body, "forged-signature", None).await,
            IngestOutcome::Rejected(RejectReason::Unauthorized)
        );
        assert_eq!(db.events().event_count("t1", Provider::Square).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tenant_scoped_merchant_mismatch_forbidden() {
        let (ingestor, db, _rx) = setup().await;

        // Valid signature over the tenant-scoped URL, but the payload
        // belongs to another merchant.
        let body = json!({
            "event_id": "E9",
            "merchant_id": "M-OTHER",
            "type": "order.created",
            "data": { "type": "order", "id": "R9" }
        })
        .to_string()
        .into_bytes();
        let tenant_url = "https://api.savory.test/pos/webhooks/t1";
        let signature = compute_signature(KEY, tenant_url, &body);

        assert_eq!(
            ingestor.ingest(&body, &signature, Some("t1")).await,
            IngestOutcome::Rejected(RejectReason::Forbidden)
        );
        assert_eq!(db.events().event_count("t1", Provider::Square).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tenant_scoped_matching_merchant_accepted() {
        let (ingestor, _db, _rx) = setup().await;
        let body = order_event();
        let tenant_url = "https://api.savory.test/pos/webhooks/t1";
        let signature = compute_signature(KEY, tenant_url, &body);

        assert_eq!(
            ingestor.ingest(&body, &signature, Some("t1")).await,
            IngestOutcome::Accepted { duplicate: false }
        );
    }

    #[tokio::test]
    async fn test_catalog_event_enqueues_catalog_sync() {
        let (ingestor, _db, mut rx) = setup().await;
        let body = json!({
            "event_id": "E2",
            "merchant_id": "M1",
            "type": "catalog.version.updated",
            "data": {}
        })
        .to_string()
        .into_bytes();
        let signature = compute_signature(KEY, GLOBAL_URL, &body);

        ingestor.ingest(&body, &signature, None).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncJob::CatalogSync { tenant_id: "t1".to_string() }
        );
    }

    #[tokio::test]
    async fn test_unknown_merchant_rejected() {
        let (ingestor, _db, _rx) = setup().await;
        let body = json!({
            "event_id": "E3",
            "merchant_id": "M-UNKNOWN",
            "type": "order.created"
        })
        .to_string()
        .into_bytes();
        let signature = compute_signature(KEY, GLOBAL_URL, &body);

        assert_eq!(
            ingestor.ingest(&body, &signature, None).await,
            IngestOutcome::Rejected(RejectReason::UnknownTenant)
        );
    }

    #[tokio::test]
    async fn test_missing_notification_url_is_configuration_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (queue, _rx) = JobQueue::bounded();
        let mut settings = PosSettings::for_tests();
        settings.notification_url_template = None;
        let ingestor = WebhookIngestor::new(Arc::new(settings), db, queue);

        let outcome = ingestor.ingest(b"{}", "sig", None).await;
        assert_eq!(outcome, IngestOutcome::Rejected(RejectReason::Configuration));
        assert_eq!(RejectReason::Configuration.http_status(), 500);
    }

    #[tokio::test]
    async fn test_event_without_id_uses_content_hash() {
        let (ingestor, db, _rx) = setup().await;
        let body = json!({ "merchant_id": "M1", "type": "ping" }).to_string().into_bytes();
        let signature = compute_signature(KEY, GLOBAL_URL, &body);

        // Same content delivered twice: second is a duplicate.
        assert_eq!(
            ingestor.ingest(&body, &signature, None).await,
            IngestOutcome::Accepted { duplicate: false }
        );
        assert_eq!(
            ingestor.ingest(&body, &signature, None).await,
            IngestOutcome::Accepted { duplicate: true }
        );
        assert_eq!(db.events().event_count("t1", Provider::Square).await.unwrap(), 1);
    }

    #[test]
    fn test_reject_reason_status_codes() {
        assert_eq!(RejectReason::Unauthorized.http_status(), 401);
        assert_eq!(RejectReason::Forbidden.http_status(), 403);
        assert_eq!(RejectReason::UnknownTenant.http_status(), 404);
        assert_eq!(RejectReason::Malformed.http_status(), 400);
    }
}

//! # Sync Jobs
//!
//! The retryable unit of work the integration engine hands to the
//! asynchronous task boundary, plus a worker loop that drains them.
//!
//! ## Job Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Job Flow                                   │
//! │                                                                         │
//! │  WebhookIngestor ──enqueue──► JobQueue (bounded mpsc)                   │
//! │  manual triggers ──enqueue──►      │                                    │
//! │                                    ▼                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                         JobWorker                               │   │
//! │  │                                                                 │   │
//! │  │  loop {                                                         │   │
//! │  │    select! {                                                    │   │
//! │  │      job = queue.recv()      => execute(job)   // logs errors   │   │
//! │  │      _   = shutdown.recv()   => break                           │   │
//! │  │    }                                                            │   │
//! │  │  }                                                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Jobs are idempotent by construction: their effects are upserts and    │
//! │  insert-if-absent over globally unique keys, so a re-run (or a         │
//! │  concurrent duplicate for the same tenant) converges rather than       │
//! │  corrupts. The external job system owns scheduling and retry policy.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{PosError, PosResult};
use crate::manager::IntegrationManager;

/// Queue depth before enqueue applies backpressure.
const QUEUE_CAPACITY: usize = 256;

// =============================================================================
// Job Definition
// =============================================================================

/// One unit of remote-API-bound work.
///
/// Serializable so an external job system can persist and replay it; the
/// idempotency contract is that executing the same job twice leaves the
/// reconciled store in the same state as executing it once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncJob {
    /// Re-sync the tenant's full catalog.
    CatalogSync { tenant_id: String },

    /// Sync the tenant's orders over an optional window.
    OrdersSync {
        tenant_id: String,
        since: Option<chrono::DateTime<chrono::Utc>>,
        until: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// Re-fetch one remote object's canonical representation and refresh
    /// its snapshot.
    RefetchObject {
        tenant_id: String,
        object_type: String,
        object_id: String,
    },
}

impl SyncJob {
    /// Tenant this job belongs to (logging and routing).
    pub fn tenant_id(&self) -> &str {
        match self {
            SyncJob::CatalogSync { tenant_id }
            | SyncJob::OrdersSync { tenant_id, .. }
            | SyncJob::RefetchObject { tenant_id, .. } => tenant_id,
        }
    }
}

// =============================================================================
// Queue Handle
// =============================================================================

/// Sending side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<SyncJob>,
}

impl JobQueue {
    /// Creates a queue and its receiving end.
    ///
    /// The receiver goes to a [`JobWorker`] in production; tests hold it
    /// directly to observe what was enqueued.
    pub fn bounded() -> (Self, mpsc::Receiver<SyncJob>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (JobQueue { tx }, rx)
    }

    /// Enqueues a job for the worker.
    pub async fn enqueue(&self, job: SyncJob) -> PosResult<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| PosError::Channel("job queue closed".to_string()))
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Drains the job queue, executing each job through the manager.
pub struct JobWorker {
    manager: IntegrationManager,
    rx: mpsc::Receiver<SyncJob>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the worker.
#[derive(Clone)]
pub struct JobWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl JobWorkerHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> PosResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| PosError::Channel("shutdown channel closed".to_string()))
    }
}

impl JobWorker {
    /// Creates a worker over an existing queue receiver.
    pub fn new(manager: IntegrationManager, rx: mpsc::Receiver<SyncJob>) -> (Self, JobWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = JobWorker { manager, rx, shutdown_rx };
        (worker, JobWorkerHandle { shutdown_tx })
    }

    /// Runs the worker loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Sync job worker starting");

        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    match job {
                        Some(job) => self.execute(job).await,
                        None => {
                            info!("Job queue closed, worker stopping");
                            break;
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Sync job worker shutting down");
                    break;
                }
            }
        }

        info!("Sync job worker stopped");
    }

    /// Executes one job; failures are logged, never propagated (the
    /// external job system re-enqueues retryable work).
    async fn execute(&self, job: SyncJob) {
        let tenant_id = job.tenant_id().to_string();
        let result = match &job {
            SyncJob::CatalogSync { tenant_id } => self
                .manager
                .sync_catalog_now(tenant_id)
                .await
                .map(|report| {
                    info!(
                        tenant = %tenant_id,
                        synced = report.synced,
                        skipped = report.skipped,
                        "Catalog sync job complete"
                    );
                }),
            SyncJob::OrdersSync { tenant_id, since, until } => self
                .manager
                .sync_orders_now(tenant_id, *since, *until)
                .await
                .map(|report| {
                    info!(
                        tenant = %tenant_id,
                        synced = report.synced,
                        skipped = report.skipped,
                        "Orders sync job complete"
                    );
                }),
            SyncJob::RefetchObject { tenant_id, object_type, object_id } => {
                self.manager.refetch_object(tenant_id, object_type, object_id).await
            }
        };

        if let Err(e) = result {
            if e.is_retryable() {
                warn!(tenant = %tenant_id, error = %e, "Sync job failed (retryable)");
            } else {
                error!(tenant = %tenant_id, error = %e, "Sync job failed");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, mut rx) = JobQueue::bounded();
        queue
            .enqueue(SyncJob::CatalogSync { tenant_id: "t1".to_string() })
            .await
            .unwrap();

        let job = rx.recv().await.unwrap();
        assert_eq!(job, SyncJob::CatalogSync { tenant_id: "t1".to_string() });
        assert_eq!(job.tenant_id(), "t1");
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped_errors() {
        let (queue, rx) = JobQueue::bounded();
        drop(rx);

        let err = queue
            .enqueue(SyncJob::CatalogSync { tenant_id: "t1".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, PosError::Channel(_)));
    }

    #[test]
    fn test_job_serialization_roundtrip() {
        let job = SyncJob::RefetchObject {
            tenant_id: "t1".to_string(),
            object_type: "order".to_string(),
            object_id: "R1".to_string(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("refetch_object"));
        let parsed: SyncJob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, job);
    }
}

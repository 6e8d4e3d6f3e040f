//! # savory-pos: POS Integration Engine
//!
//! Connects Savory tenants to external POS providers: OAuth lifecycle,
//! rate-limited provider clients, per-provider adapters, exactly-once
//! webhook ingestion, sync jobs, and read-side sales analytics.
//!
//! ## Control Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Integration Control Flow                           │
//! │                                                                         │
//! │  inbound webhook ──► WebhookIngestor                                    │
//! │                        │ verify signature (HMAC, constant-time)        │
//! │                        │ idempotent ledger insert                      │
//! │                        │ snapshot upsert                               │
//! │                        ▼                                                │
//! │                      JobQueue ──► JobWorker                             │
//! │                                     │                                   │
//! │  manual sync trigger ───────────────┤                                   │
//! │                                     ▼                                   │
//! │                      IntegrationManager                                 │
//! │                        │ resolve tenant                                 │
//! │                        │ OAuthManager.ensure_fresh (≤5 min to expiry)  │
//! │                        │ make_adapter (Square/Toast/Clover/Custom)     │
//! │                        ▼                                                │
//! │                      PosAdapter ──► ProviderClient                      │
//! │                        │              429 → bounded backoff + jitter   │
//! │                        │              401 → typed AuthFailed signal    │
//! │                        ▼                                                │
//! │                      reconciled store (savory-db)                       │
//! │                                                                         │
//! │  analytics (daily summary, top items, trends, prep forecast) read      │
//! │  ONLY from the reconciled store — no live provider calls.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The platform's web layer terminates TLS, parses requests, and calls
//! into this crate; it owns authentication for tenant-scoped management
//! routes. This crate owns everything from the raw webhook body / OAuth
//! query params down.

pub mod adapters;
pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod manager;
pub mod oauth;
pub mod vault;
pub mod webhook;

pub use adapters::{
    make_adapter, PaymentOutcome, PosAdapter, PushOutcome, RemoteLine, RemoteOrder, SyncReport,
};
pub use config::{PosSettings, SquareEnvironment};
pub use error::{PosError, PosResult};
pub use http::ProviderClient;
pub use jobs::{JobQueue, JobWorker, JobWorkerHandle, SyncJob};
pub use manager::{
    DailySalesSummary, IntegrationManager, IngredientNeed, ItemForecast, PaymentMethodSummary,
    PrepForecast, TopItem, TrendAnalysis,
};
pub use oauth::{CallbackParams, CallbackRedirect, ConnectionStatus, OAuthManager};
pub use vault::{CredentialVault, VaultAccessor};
pub use webhook::{IngestOutcome, RejectReason, WebhookIngestor};

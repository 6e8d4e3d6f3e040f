//! # savory-db: Reconciled Store for the Savory POS Integration
//!
//! SQLite persistence for everything the integration subsystem owns:
//! tenant POS configuration, the reconciled catalog and orders, the webhook
//! idempotency ledger, remote object snapshots, and the prep-forecasting
//! read model.
//!
//! ## Responsibilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          savory-db                                      │
//! │                                                                         │
//! │  pool        - SqlitePool creation, WAL mode, in-memory for tests      │
//! │  migrations  - embedded SQL migrations                                 │
//! │  repository  - tenant / catalog / order / event / recipe repositories  │
//! │                                                                         │
//! │  Mutation discipline: every write is a single-row upsert or            │
//! │  insert-if-absent (the one exception: importing an order writes the    │
//! │  order, its lines, and its payment inside one transaction).            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::catalog::{CatalogItemUpsert, CatalogRepository};
pub use repository::event::{EventRepository, NewExternalEvent, SnapshotUpsert};
pub use repository::order::{
    DailyTotals, ItemQuantity, ItemSales, MethodTotal, NewImportedLine, NewImportedOrder,
    NewImportedPayment, OrderRepository, WindowTotals,
};
pub use repository::recipe::RecipeRepository;
pub use repository::tenant::TenantRepository;

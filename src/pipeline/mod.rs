//! # State population refresh pipeline
//!
//! Fetches county features from an ArcGIS feature layer, sums population per
//! state and keeps the latest snapshot generation in SQLite.
//!
//! ## Flow
//!
//! ```text
//! RefreshScheduler (startup + every N minutes)     POST /api/stats/refresh
//!          │                                                │
//!          └──────────────► Refresher::refresh ◄────────────┘
//!                                │
//!              ArcGisCountiesClient::fetch_aggregated_totals
//!                (paged query → StateTotals, retry/backoff)
//!                                │
//!                 SnapshotStore::replace_all (one transaction)
//! ```
//!
//! ## Module Organization
//!
//! - `types` - wire types (`AttributeValue`, `ExternalPage`) and snapshot rows
//! - `aggregate` - case-insensitive per-state accumulation
//! - `arcgis` - paginated feature service client
//! - `retry` - exponential backoff
//! - `db` - snapshot store trait and SQLite implementation
//! - `refresher` - one refresh cycle
//! - `scheduler` - periodic background loop
//! - `error` - `RefreshError` taxonomy

pub mod types;
pub mod aggregate;
pub mod arcgis;
pub mod retry;
pub mod db;
pub mod refresher;
pub mod scheduler;
pub mod error;

// Re-export commonly used types
pub use types::{AttributeValue, ExternalPage, Feature, StatePopulationSnapshot};
pub use aggregate::StateTotals;
pub use arcgis::{ArcGisCountiesClient, ArcGisSettings, PopulationSource};
pub use db::{SnapshotStore, SqliteSnapshotStore};
pub use refresher::Refresher;
pub use scheduler::RefreshScheduler;
pub use error::RefreshError;

//! FinSight metrics store
//!
//! SQLite persistence for raw financial facts and computed metric
//! snapshots. Snapshots are replaced wholesale per refresh run; facts are
//! append-only and owned by the ingestion layer.

pub mod db;
pub mod fact_store;
pub mod snapshot_store;

pub use db::MetricsDb;
pub use fact_store::SqliteFactStore;
pub use snapshot_store::SnapshotStore;

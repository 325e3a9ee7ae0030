//! Persistence of targets, observations, alerts and settings
//!
//! ## Design
//!
//! - **Trait-based**: `MonitorStore` lets the pipeline run against SQLite in
//!   production and an in-memory store in tests
//! - **Async**: every operation is one awaited unit of work
//! - **Append-only**: the core never updates or deletes observations or alerts
//!
//! ## Backends
//!
//! - **SQLite** (default): the database file shared with the web layer
//! - **In-Memory**: no persistence, supports fault injection
//!
//! ## Usage
//!
//! ```no_run
//! use infra_monitor::storage::{MonitorStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./monitoring.db").await?;
//!     let targets = store.get_enabled_targets().await?;
//!     println!("{} targets", targets.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use backend::{HealthStatus, MonitorStore, ensure_healthy};
pub use error::{StorageError, StorageResult};
pub use memory::{Fault, MemoryStore};
pub use schema::{AlertRow, AlertState, ObservationRow};
pub use sqlite::SqliteStore;

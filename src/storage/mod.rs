//! Durable key-value storage backends.
//!
//! - [`memory::MemoryStore`]: DashMap, process-local
//! - [`sqlite::SqliteStore`]: SQLite file via sqlx, survives restarts

pub mod traits;
pub mod memory;
pub mod sqlite;

pub use traits::{KeyValueStore, StorageError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

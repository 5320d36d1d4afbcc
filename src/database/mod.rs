//! Persistence layer.
//!
//! Provides SQLite connection management, schema migrations and the
//! key/value store used for credentials, private tabs and settings.
//!
//! # Usage
//!
//! ```no_run
//! use tabguard::database::{KeyValueStore, SqliteStore};
//!
//! # async fn demo() -> Result<(), tabguard::types::errors::StoreError> {
//! let store = SqliteStore::open("tabguard.db")?;
//! store.set("settings", serde_json::json!({"privateMode": true})).await?;
//! let value = store.get("settings").await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;
pub mod store;

pub use connection::Database;
pub use store::{KeyValueStore, MemoryStore, SqliteStore};

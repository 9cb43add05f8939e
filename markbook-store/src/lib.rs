//! Persistence layer interface for the Markbook vault core.
//!
//! The production store ships with the application shell; this crate
//! defines the async contract the vault, migration engine, and backup
//! service program against, plus an in-memory implementation used by tests
//! and previews.
//!
//! Writes are assumed durable once the future resolves. All access goes
//! through a fixed, enumerable set of string keys (see [`keys`]).

mod error;
pub mod keys;
mod memory;
mod migrate;
mod snapshot;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use migrate::{
    MigrateError, MigrateResult, Migration, MigrationEngine, MigrationReport, CURRENT_DB_VERSION,
    MIGRATIONS,
};
pub use snapshot::KeyedSnapshot;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Asynchronous string-keyed JSON store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> StoreResult<()>;
}

/// Reads a key and deserializes it, treating `null` as absent.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Serializes a value and writes it under `key`.
pub async fn set_typed<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    store.set(key, serde_json::to_value(value)?).await
}

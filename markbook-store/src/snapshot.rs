//! The full keyed data snapshot moved as a unit by migrations and backups.

use crate::keys::COLLECTION_KEYS;
use crate::{KeyValueStore, StoreResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// All domain collections, addressed by their fixed keys.
///
/// Collections this core never looks inside stay opaque [`Value`]s; only
/// migrations reach into their structure.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyedSnapshot {
    collections: BTreeMap<String, Value>,
}

impl KeyedSnapshot {
    /// Loads every collection in the fixed key list. Absent keys load as
    /// `null` so migrations can seed them.
    pub async fn load(store: &dyn KeyValueStore) -> StoreResult<Self> {
        let mut collections = BTreeMap::new();
        for key in COLLECTION_KEYS {
            let value = store.get(key).await?.unwrap_or(Value::Null);
            collections.insert(key.to_string(), value);
        }
        Ok(Self { collections })
    }

    /// Persists every collection back under its fixed key.
    pub async fn persist(&self, store: &dyn KeyValueStore) -> StoreResult<()> {
        for key in COLLECTION_KEYS {
            if let Some(value) = self.collections.get(key) {
                store.set(key, value.clone()).await?;
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.collections.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.collections.insert(key.to_string(), value);
    }

    /// Mutable access to one collection, inserting `null` when missing.
    pub fn entry(&mut self, key: &str) -> &mut Value {
        self.collections.entry(key.to_string()).or_insert(Value::Null)
    }
}

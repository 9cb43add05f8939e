//! Versioned schema migrations over the keyed snapshot.
//!
//! Migrations form a sparse table indexed by target version: only versions
//! present in the table do work, every other integer between the stored and
//! the current version is a no-op. Each migration must be idempotent
//! ("add field if absent") because an aborted pass leaves partially
//! transformed but unversioned data that is re-migrated from the same base
//! on the next startup.

use crate::keys::{self, DB_VERSION};
use crate::{KeyValueStore, KeyedSnapshot, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Schema version written by the engine after a successful pass.
pub const CURRENT_DB_VERSION: u32 = 4;

/// Version assumed for stores that predate version stamping.
const BASE_DB_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("migration to version {version} failed: {reason}")]
    Step { version: u32, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type MigrateResult<T> = Result<T, MigrateError>;

/// A pure snapshot transformation targeting one schema version.
pub struct Migration {
    pub version: u32,
    pub apply: fn(&mut KeyedSnapshot) -> Result<(), String>,
}

/// The shipped migration table. Sparse: v3 was a code-only release with no
/// data change.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        apply: add_grade_weights,
    },
    Migration {
        version: 4,
        apply: add_archive_flags_and_default_categories,
    },
];

/// Outcome of one migration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    /// Versions whose table entry actually ran.
    pub applied: Vec<u32>,
}

/// Applies outstanding migrations to the stored snapshot.
pub struct MigrationEngine {
    store: Arc<dyn KeyValueStore>,
    table: &'static [Migration],
    target: u32,
}

impl MigrationEngine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            table: MIGRATIONS,
            target: CURRENT_DB_VERSION,
        }
    }

    /// Engine over a custom table and target version (tests).
    pub fn with_table(
        store: Arc<dyn KeyValueStore>,
        table: &'static [Migration],
        target: u32,
    ) -> Self {
        Self {
            store,
            table,
            target,
        }
    }

    /// Runs every outstanding migration and persists the result.
    ///
    /// Nothing is written unless all steps succeed: a failing step aborts
    /// the pass with the stored version and collections untouched, so the
    /// next startup re-runs from the same base. The stored version never
    /// decreases.
    pub async fn run(&self) -> MigrateResult<MigrationReport> {
        let from = self.stored_version().await?;
        if from >= self.target {
            debug!(version = from, "schema already current, nothing to migrate");
            return Ok(MigrationReport {
                from,
                to: from,
                applied: Vec::new(),
            });
        }

        let mut snapshot = KeyedSnapshot::load(self.store.as_ref()).await?;
        let mut applied = Vec::new();
        for version in (from + 1)..=self.target {
            if let Some(migration) = self.table.iter().find(|m| m.version == version) {
                (migration.apply)(&mut snapshot)
                    .map_err(|reason| MigrateError::Step { version, reason })?;
                applied.push(version);
            }
        }

        snapshot.persist(self.store.as_ref()).await?;
        self.store.set(DB_VERSION, json!(self.target)).await?;
        info!(from, to = self.target, ?applied, "schema migration pass complete");

        Ok(MigrationReport {
            from,
            to: self.target,
            applied,
        })
    }

    async fn stored_version(&self) -> MigrateResult<u32> {
        let value = self.store.get(DB_VERSION).await?;
        Ok(value
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(BASE_DB_VERSION))
    }
}

/// v2: grades gained per-entry weighting in app 1.1.
fn add_grade_weights(snapshot: &mut KeyedSnapshot) -> Result<(), String> {
    if let Value::Array(entries) = snapshot.entry(keys::GRADES) {
        for entry in entries {
            if let Value::Object(map) = entry {
                map.entry("weight").or_insert(json!(1.0));
            }
        }
    }
    Ok(())
}

/// v4: students gained an archive flag and categories became a stored
/// collection with a seeded default set.
fn add_archive_flags_and_default_categories(snapshot: &mut KeyedSnapshot) -> Result<(), String> {
    if let Value::Array(students) = snapshot.entry(keys::STUDENTS) {
        for student in students {
            if let Value::Object(map) = student {
                map.entry("archived").or_insert(json!(false));
            }
        }
    }

    let categories = snapshot.entry(keys::CATEGORIES);
    if categories.is_null() {
        *categories = json!([
            { "id": "oral", "label": "Oral", "weight": 0.5 },
            { "id": "written", "label": "Written", "weight": 0.5 },
        ]);
    }
    Ok(())
}

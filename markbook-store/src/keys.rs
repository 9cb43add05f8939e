//! The fixed key set shared by the migration engine and the backup service.
//!
//! Every collection named in [`COLLECTION_KEYS`] is migrated on unlock and
//! carried by backups. A key missing from this list would silently lose
//! data on restore, so the list exists in exactly one place.

pub const STUDENTS: &str = "students";
pub const GROUPS: &str = "groups";
pub const GRADES: &str = "grades";
pub const CATEGORIES: &str = "categories";
pub const PREFERENCES: &str = "preferences";

/// Domain collections, in persistence order.
pub const COLLECTION_KEYS: [&str; 5] = [STUDENTS, GROUPS, GRADES, CATEGORIES, PREFERENCES];

// Vault metadata keys. Not part of the snapshot and never exported.
pub const AUTH_SALT: &str = "auth_salt";
pub const AUTH_CHECK_VALUE: &str = "auth_check_value";
pub const RECOVERY_PHRASE_HASH: &str = "recovery_phrase_hash";
pub const BIOMETRIC_ENABLED: &str = "biometric_unlock_enabled";
pub const DB_VERSION: &str = "db_version";
pub const LAST_BACKUP_AT: &str = "last_backup_at";

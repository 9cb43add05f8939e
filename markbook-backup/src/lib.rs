//! Encrypted backup export and two-phase restore.
//!
//! A backup file is a JSON envelope `{ salt, iv, ciphertext }`. Its
//! ciphertext decrypts to a payload carrying the schema version, app
//! version, timestamp, and every domain collection. The key is derived
//! from a backup-specific password and the embedded salt, independent of
//! the login credentials.
//!
//! Restore is deliberately split in two: [`BackupService::check_backup_file`]
//! classifies the file without touching local state, and
//! [`BackupService::apply`] performs the destructive overwrite only after
//! the caller confirmed. The service never logs the user in or out; that is
//! the vault's job.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use markbook_crypto::{
    decrypt, derive_key, encrypt, DerivedKey, EncryptedData, KdfParams, Salt, NONCE_SIZE,
    SALT_SIZE,
};
use markbook_store::{keys, KeyValueStore, StoreError, CURRENT_DB_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Format version written into new payloads. Version-1 files predate the
/// salted envelope and are permanently rejected.
pub const BACKUP_FORMAT_VERSION: u32 = 2;

/// File extension of exported containers.
pub const BACKUP_FILE_EXTENSION: &str = "mbk";

#[derive(Debug, Error)]
pub enum BackupError {
    /// Envelope lacks salt/iv/ciphertext: an obsolete or foreign file.
    #[error("unsupported backup format")]
    UnsupportedFormat,

    #[error("wrong backup password")]
    WrongPassword,

    /// The file is unparseable or the decrypted payload lacks required
    /// fields.
    #[error("backup file damaged or incomplete")]
    DamagedPayload,

    /// A required collection key is missing from the payload data.
    #[error("backup data incomplete: missing '{key}'")]
    IncompleteData { key: String },

    /// Payload was written by a newer schema; applying it is refused.
    #[error("backup schema version {backup} is newer than supported version {current}")]
    SchemaTooNew { backup: u32, current: u32 },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BackupResult<T> = Result<T, BackupError>;

/// Outer encrypted container, serialized as the backup file's JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupEnvelope {
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
}

/// Decrypted backup content. `dbVersion`, `appVersion`, and `data` are
/// required; the rest is tolerated when absent so slightly damaged files
/// still classify correctly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    #[serde(default)]
    pub version: u32,
    pub app_version: String,
    pub db_version: u32,
    #[serde(default)]
    pub timestamp: i64,
    pub data: BTreeMap<String, Value>,
}

/// Phase-1 classification. The payload is only attached when applying it is
/// allowed; a newer-schema file never reaches the caller's hands.
#[derive(Clone, Debug, PartialEq)]
pub enum BackupCheck {
    /// Schema matches the running app; ready to apply.
    Current { payload: BackupPayload },
    /// Backup is older and will be migrated forward after apply. The caller
    /// should warn before confirming.
    RequiresMigration { payload: BackupPayload },
}

pub struct BackupService {
    store: Arc<dyn KeyValueStore>,
    kdf: KdfParams,
    app_version: &'static str,
}

impl BackupService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            kdf: KdfParams::default(),
            app_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Collects every collection in the fixed key list, encrypts the
    /// payload under `password` with a fresh salt, and returns the
    /// container bytes. Records the export as the last backup time.
    pub async fn export(&self, password: &str) -> BackupResult<Vec<u8>> {
        let mut data = BTreeMap::new();
        for key in keys::COLLECTION_KEYS {
            // Absent collections export as `null` so the key set stays
            // complete and a fresh-install backup restores cleanly.
            let value = self.store.get(key).await?.unwrap_or(Value::Null);
            data.insert(key.to_string(), value);
        }

        let db_version = self.stored_db_version().await?;
        let timestamp = Utc::now().timestamp_millis();
        let payload = BackupPayload {
            version: BACKUP_FORMAT_VERSION,
            app_version: self.app_version.to_string(),
            db_version,
            timestamp,
            data,
        };

        let bytes = seal(&payload, password, &self.kdf).await?;
        self.store
            .set(keys::LAST_BACKUP_AT, Value::from(timestamp))
            .await?;
        info!(db_version, size = bytes.len(), "backup exported");
        Ok(bytes)
    }

    /// Phase 1: validates the container and classifies schema
    /// compatibility. Local state is never touched.
    pub async fn check_backup_file(
        &self,
        bytes: &[u8],
        password: &str,
    ) -> BackupResult<BackupCheck> {
        let payload = open(bytes, password, &self.kdf).await?;
        match payload.db_version.cmp(&CURRENT_DB_VERSION) {
            Ordering::Equal => Ok(BackupCheck::Current { payload }),
            Ordering::Less => Ok(BackupCheck::RequiresMigration { payload }),
            Ordering::Greater => {
                warn!(
                    backup = payload.db_version,
                    current = CURRENT_DB_VERSION,
                    "refusing backup from a newer schema"
                );
                Err(BackupError::SchemaTooNew {
                    backup: payload.db_version,
                    current: CURRENT_DB_VERSION,
                })
            }
        }
    }

    /// Phase 2: full destructive overwrite of local data. Only call after
    /// the caller explicitly confirmed a successful check.
    ///
    /// Verifies every fixed key is present before writing anything; the
    /// payload's schema version is stored so a following unlock migrates
    /// older data forward. There is no merge.
    pub async fn apply(&self, payload: &BackupPayload) -> BackupResult<()> {
        for key in keys::COLLECTION_KEYS {
            if !payload.data.contains_key(key) {
                return Err(BackupError::IncompleteData {
                    key: key.to_string(),
                });
            }
        }

        for key in keys::COLLECTION_KEYS {
            let value = payload.data.get(key).cloned().unwrap_or(Value::Null);
            self.store.set(key, value).await?;
        }
        self.store
            .set(keys::DB_VERSION, Value::from(payload.db_version))
            .await?;
        self.store
            .set(keys::LAST_BACKUP_AT, Value::from(payload.timestamp))
            .await?;

        info!(db_version = payload.db_version, "backup applied");
        Ok(())
    }

    /// Timestamp of the most recent export or applied backup.
    pub async fn last_backup_at(&self) -> BackupResult<Option<i64>> {
        Ok(self
            .store
            .get(keys::LAST_BACKUP_AT)
            .await?
            .and_then(|v| v.as_i64()))
    }

    async fn stored_db_version(&self) -> BackupResult<u32> {
        Ok(self
            .store
            .get(keys::DB_VERSION)
            .await?
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(CURRENT_DB_VERSION))
    }
}

/// Encrypts `payload` into container bytes under `password` and a fresh
/// salt independent of the login credentials.
pub async fn seal(
    payload: &BackupPayload,
    password: &str,
    kdf: &KdfParams,
) -> BackupResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)?;
    let salt = Salt::random();
    let key = derive_blocking(password, &salt, kdf).await?;
    let encrypted = encrypt(&key, &plaintext).map_err(|e| BackupError::Crypto(e.to_string()))?;

    let envelope = BackupEnvelope {
        salt: BASE64.encode(salt.as_bytes()),
        iv: BASE64.encode(encrypted.nonce),
        ciphertext: BASE64.encode(&encrypted.ciphertext),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decrypts container bytes back into a payload.
///
/// The error variants keep causes apart on purpose: an unparseable file is
/// damage, a parseable envelope without the required fields is an
/// unsupported (legacy) format, and a failed decryption is a wrong
/// password, never a format problem.
pub async fn open(bytes: &[u8], password: &str, kdf: &KdfParams) -> BackupResult<BackupPayload> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|_| BackupError::DamagedPayload)?;
    let envelope: BackupEnvelope =
        serde_json::from_value(value).map_err(|_| BackupError::UnsupportedFormat)?;

    let salt_bytes = BASE64
        .decode(&envelope.salt)
        .map_err(|_| BackupError::DamagedPayload)?;
    let iv_bytes = BASE64
        .decode(&envelope.iv)
        .map_err(|_| BackupError::DamagedPayload)?;
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|_| BackupError::DamagedPayload)?;

    let salt_bytes: [u8; SALT_SIZE] = salt_bytes
        .try_into()
        .map_err(|_| BackupError::DamagedPayload)?;
    let nonce: [u8; NONCE_SIZE] = iv_bytes
        .try_into()
        .map_err(|_| BackupError::DamagedPayload)?;

    let key = derive_blocking(password, &Salt::from_bytes(salt_bytes), kdf).await?;
    let plaintext = decrypt(
        &key,
        &EncryptedData {
            nonce,
            ciphertext,
        },
    )
    .map_err(|_| BackupError::WrongPassword)?;

    serde_json::from_slice(&plaintext).map_err(|_| BackupError::DamagedPayload)
}

async fn derive_blocking(password: &str, salt: &Salt, kdf: &KdfParams) -> BackupResult<DerivedKey> {
    let password = password.to_string();
    let salt = salt.clone();
    let kdf = kdf.clone();
    tokio::task::spawn_blocking(move || derive_key(&password, &salt, &kdf))
        .await
        .map_err(|e| BackupError::Crypto(format!("kdf task failed: {e}")))?
        .map_err(|e| BackupError::Crypto(e.to_string()))
}

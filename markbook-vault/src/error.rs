use crate::VaultState;
use markbook_store::{MigrateError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault not initialized")]
    NotInitialized,

    #[error("vault already initialized")]
    AlreadyInitialized,

    #[error("vault is locked")]
    Locked,

    #[error("operation not valid in state {state:?}")]
    InvalidState { state: VaultState },

    #[error("invalid password")]
    InvalidPassword,

    #[error("password too short (min 8 characters)")]
    PasswordTooShort,

    #[error("recovery is not configured")]
    RecoveryNotConfigured,

    #[error("invalid recovery phrase")]
    InvalidRecoveryPhrase,

    #[error("platform credential store unavailable: {0}")]
    BiometricUnavailable(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrateError),
}

impl VaultError {
    pub(crate) fn crypto(err: markbook_crypto::CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

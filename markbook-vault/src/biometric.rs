//! Biometric-assisted unlock via the platform credential store.
//!
//! The bridge only ever wraps the login password; no biometric data reaches
//! this crate. Enabling requires the current password up front, so a bridge
//! failure and a wrong password surface as distinct errors. The unlock path
//! is the opposite: every failure degrades silently to manual entry.

use crate::{Vault, VaultError, VaultResult, VaultState};
use async_trait::async_trait;
use markbook_store::{keys, set_typed};
use thiserror::Error;
use tracing::{info, warn};

/// Opaque platform credential store failure.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BridgeError(pub String);

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Platform credential store contract. Implementations persist a secret
/// payload behind whatever user-presence check the OS provides.
#[async_trait]
pub trait CredentialBridge: Send + Sync {
    /// Whether credentials can be stored on this platform at all.
    fn is_supported(&self) -> bool;

    /// Persists a credential wrapping `payload`, replacing any previous one.
    async fn store_credential(&self, payload: &str) -> BridgeResult<()>;

    /// Returns the stored payload, or `None` when no credential exists.
    async fn retrieve_credential(&self) -> BridgeResult<Option<String>>;

    /// Removes the stored credential. Absence is not an error.
    async fn remove_credential(&self) -> BridgeResult<()>;
}

/// Outcome of a biometric unlock attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiometricUnlock {
    Unlocked,
    /// Credential missing, bridge failure, or stale stored password: the
    /// caller shows the manual password prompt. No cause is surfaced.
    FellBack,
}

/// OS keyring implementation (Credential Manager on Windows, Keychain on
/// macOS, Secret Service on Linux). Keyring calls are blocking, so they run
/// on the blocking pool.
pub struct KeyringBridge {
    service: String,
    account: String,
}

impl KeyringBridge {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl Default for KeyringBridge {
    fn default() -> Self {
        Self::new("Markbook", "vault_unlock")
    }
}

#[async_trait]
impl CredentialBridge for KeyringBridge {
    fn is_supported(&self) -> bool {
        cfg!(any(target_os = "linux", target_os = "windows", target_os = "macos"))
    }

    async fn store_credential(&self, payload: &str) -> BridgeResult<()> {
        let (service, account) = (self.service.clone(), self.account.clone());
        let payload = payload.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| BridgeError(format!("keyring init: {e}")))?;
            entry
                .set_password(&payload)
                .map_err(|e| BridgeError(format!("store credential: {e}")))
        })
        .await
        .map_err(|e| BridgeError(format!("keyring task: {e}")))?
    }

    async fn retrieve_credential(&self) -> BridgeResult<Option<String>> {
        let (service, account) = (self.service.clone(), self.account.clone());
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| BridgeError(format!("keyring init: {e}")))?;
            match entry.get_password() {
                Ok(payload) => Ok(Some(payload)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(BridgeError(format!("load credential: {e}"))),
            }
        })
        .await
        .map_err(|e| BridgeError(format!("keyring task: {e}")))?
    }

    async fn remove_credential(&self) -> BridgeResult<()> {
        let (service, account) = (self.service.clone(), self.account.clone());
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| BridgeError(format!("keyring init: {e}")))?;
            match entry.delete_password() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(BridgeError(format!("delete credential: {e}"))),
            }
        })
        .await
        .map_err(|e| BridgeError(format!("keyring task: {e}")))?
    }
}

impl Vault {
    /// Confirms `password` is the current password, then asks the platform
    /// store to persist a credential wrapping it. A wrong password surfaces
    /// as [`VaultError::InvalidPassword`]; any bridge failure forces the
    /// flag off and surfaces [`VaultError::BiometricUnavailable`].
    pub async fn enable_biometric_unlock(&self, password: &str) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        if let Err(err) = self.verify_password(password, false).await {
            self.write_biometric_flag(false).await?;
            return Err(err);
        }

        if !self.inner.bridge.is_supported() {
            self.write_biometric_flag(false).await?;
            return Err(VaultError::BiometricUnavailable(
                "not supported on this platform".to_string(),
            ));
        }
        if let Err(err) = self.inner.bridge.store_credential(password).await {
            self.write_biometric_flag(false).await?;
            return Err(VaultError::BiometricUnavailable(err.to_string()));
        }

        self.write_biometric_flag(true).await?;
        info!("biometric unlock enabled");
        Ok(())
    }

    /// Best-effort credential removal; the flag always ends up false.
    pub async fn disable_biometric_unlock(&self) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        if let Err(err) = self.inner.bridge.remove_credential().await {
            warn!(error = %err, "credential removal failed; clearing flag anyway");
        }
        self.write_biometric_flag(false).await?;
        info!("biometric unlock disabled");
        Ok(())
    }

    /// Replays the stored credential through the normal password
    /// verification. Any failure or absence transitions to `Locked` and
    /// reports only [`BiometricUnlock::FellBack`].
    pub async fn try_biometric_unlock(&self) -> VaultResult<BiometricUnlock> {
        let _op = self.inner.op_guard.lock().await;
        if self.state() != VaultState::AwaitingBiometric {
            return Err(VaultError::InvalidState { state: self.state() });
        }

        let password = match self.inner.bridge.retrieve_credential().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!("no stored credential; falling back to password entry");
                self.transition(VaultState::Locked);
                return Ok(BiometricUnlock::FellBack);
            }
            Err(err) => {
                warn!(error = %err, "credential retrieval failed; falling back");
                self.transition(VaultState::Locked);
                return Ok(BiometricUnlock::FellBack);
            }
        };

        match self.verify_password(&password, true).await {
            Ok(_) => {
                self.finish_unlock().await?;
                Ok(BiometricUnlock::Unlocked)
            }
            Err(_) => {
                warn!("stored credential rejected; falling back to password entry");
                self.transition(VaultState::Locked);
                Ok(BiometricUnlock::FellBack)
            }
        }
    }

    pub(crate) async fn write_biometric_flag(&self, enabled: bool) -> VaultResult<()> {
        set_typed(self.store(), keys::BIOMETRIC_ENABLED, &enabled).await?;
        Ok(())
    }
}

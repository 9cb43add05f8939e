//! Recovery phrase setup and password reset.
//!
//! Only the phrase's one-way hash is persisted; the phrase itself is
//! returned to the caller exactly once and cannot be retrieved again. A
//! verified phrase authorizes setting a new password without the old one.

use crate::{Vault, VaultError, VaultResult, VaultState};
use markbook_crypto::{phrase_hash, RecoveryPhrase};
use markbook_store::{get_typed, keys, set_typed};
use tracing::info;

impl Vault {
    /// Generates a phrase, persists only its hash, and returns it. The
    /// caller must display it immediately; it is never retrievable again.
    /// Requires an open session.
    pub async fn setup_recovery(&self) -> VaultResult<RecoveryPhrase> {
        let _op = self.inner.op_guard.lock().await;
        if self.state() != VaultState::Unlocked {
            return Err(VaultError::Locked);
        }
        let phrase = RecoveryPhrase::generate();
        let hash = phrase_hash(phrase.as_str());
        set_typed(self.store(), keys::RECOVERY_PHRASE_HASH, &hash).await?;
        info!("recovery phrase configured");
        Ok(phrase)
    }

    /// Whether a recovery hash has been stored.
    pub async fn has_recovery(&self) -> VaultResult<bool> {
        Ok(self.read_recovery_hash().await?.is_some())
    }

    /// Recomputes the digest of `phrase` and compares it to the stored
    /// hash. Serves both the post-setup confirmation and the reset entry
    /// check; a mistyped word is only caught here, the phrase itself
    /// carries no checksum.
    pub async fn verify_recovery_phrase(&self, phrase: &str) -> VaultResult<bool> {
        let stored = self
            .read_recovery_hash()
            .await?
            .ok_or(VaultError::RecoveryNotConfigured)?;
        Ok(phrase_hash(phrase) == stored)
    }

    /// Enters the recovery flow from `Locked`.
    pub async fn begin_recovery(&self) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        if self.state() != VaultState::Locked {
            return Err(VaultError::InvalidState { state: self.state() });
        }
        if self.read_recovery_hash().await?.is_none() {
            return Err(VaultError::RecoveryNotConfigured);
        }
        self.transition(VaultState::Recovering);
        Ok(())
    }

    /// Abandons the recovery flow and returns to `Locked`.
    pub async fn cancel_recovery(&self) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        if self.state() == VaultState::Recovering {
            self.transition(VaultState::Locked);
        }
        Ok(())
    }

    /// Sets a new password without the old one, authorized by the recovery
    /// phrase. The phrase is re-verified here so the destructive step never
    /// rides on an earlier check. Ends in `Locked`: the user must
    /// authenticate with the new password.
    pub async fn reset_password(&self, phrase: &str, new_password: &str) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        if self.state() != VaultState::Recovering {
            return Err(VaultError::InvalidState { state: self.state() });
        }
        let stored = self
            .read_recovery_hash()
            .await?
            .ok_or(VaultError::RecoveryNotConfigured)?;
        if phrase_hash(phrase) != stored {
            return Err(VaultError::InvalidRecoveryPhrase);
        }

        self.install_password(new_password).await?;
        self.force_lock("password reset via recovery phrase");
        info!("password reset completed");
        Ok(())
    }

    async fn read_recovery_hash(&self) -> VaultResult<Option<String>> {
        Ok(get_typed::<String>(self.store(), keys::RECOVERY_PHRASE_HASH).await?)
    }
}

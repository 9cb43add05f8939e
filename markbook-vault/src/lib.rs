//! Password vault and session state machine for Markbook.
//!
//! The vault owns the only copy of the session key, verifies passwords
//! against an encrypted check value, coordinates recovery-phrase and
//! biometric unlock, runs outstanding schema migrations on every successful
//! authentication, and enforces the inactivity auto-lock.
//!
//! # State machine
//!
//! ```text
//! Initializing -> { SettingPassword | AwaitingBiometric | Locked } -> Unlocked
//! Unlocked -> Locked            (logout, timeout, password change/reset)
//! Locked <-> Recovering         (password reset via recovery phrase)
//! AwaitingBiometric -> Locked   (fallback to manual entry)
//! ```
//!
//! All mutating operations are serialized through a single-flight guard;
//! overlapping unlock/backup attempts queue instead of interleaving.

mod autolock;
mod biometric;
mod error;
mod recovery;

pub use autolock::{AutoLockConfig, WARNING_LEAD};
pub use biometric::{BiometricUnlock, BridgeError, BridgeResult, CredentialBridge, KeyringBridge};
pub use error::{VaultError, VaultResult};

use autolock::AutoLock;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use markbook_crypto::{
    decrypt, derive_key, encrypt, DerivedKey, EncryptedData, KdfParams, Salt, SALT_SIZE,
};
use markbook_store::{get_typed, keys, set_typed, KeyValueStore, MigrationEngine, StoreError};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Known plaintext encrypted under the master key and persisted; decrypting
/// it verifies a candidate password without touching real data.
const CHECK_VALUE_PLAINTEXT: &[u8] = b"markbook-auth-check-token-v1";

const MIN_PASSWORD_LEN: usize = 8;

/// Authentication states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VaultState {
    Initializing,
    SettingPassword,
    AwaitingBiometric,
    Locked,
    Recovering,
    Unlocked,
}

/// Events broadcast to subscribed UI code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum VaultEvent {
    StateChanged(VaultState),
    /// Fired one minute before the inactivity timeout expires. Calling
    /// [`Vault::record_activity`] extends the session.
    LockWarning,
}

struct VaultInner {
    store: Arc<dyn KeyValueStore>,
    bridge: Arc<dyn CredentialBridge>,
    engine: MigrationEngine,
    kdf: KdfParams,
    state: RwLock<VaultState>,
    /// The session key. Exactly one holder, written once per unlock,
    /// cleared on every transition out of `Unlocked`.
    session_key: RwLock<Option<DerivedKey>>,
    events: broadcast::Sender<VaultEvent>,
    /// Serializes authentication, recovery, and biometric operations.
    op_guard: Mutex<()>,
    autolock: AutoLock,
}

/// Cheap-to-clone handle; all clones share one state machine.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

impl Vault {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        bridge: Arc<dyn CredentialBridge>,
        autolock: AutoLockConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        let engine = MigrationEngine::new(store.clone());
        Self {
            inner: Arc::new(VaultInner {
                store,
                bridge,
                engine,
                kdf: KdfParams::default(),
                state: RwLock::new(VaultState::Initializing),
                session_key: RwLock::new(None),
                events,
                op_guard: Mutex::new(()),
                autolock: AutoLock::new(autolock),
            }),
        }
    }

    /// Reads the persisted auth material and settles into the startup state:
    /// no salt means first run, a set biometric flag (with a usable bridge)
    /// means biometric-first unlock, anything else means manual entry.
    pub async fn start(&self) -> VaultResult<VaultState> {
        let _op = self.inner.op_guard.lock().await;
        let next = if self.read_salt().await?.is_none() {
            VaultState::SettingPassword
        } else {
            let biometric: bool = get_typed(self.inner.store.as_ref(), keys::BIOMETRIC_ENABLED)
                .await?
                .unwrap_or(false);
            if biometric && self.inner.bridge.is_supported() {
                VaultState::AwaitingBiometric
            } else {
                VaultState::Locked
            }
        };
        self.transition(next);
        Ok(next)
    }

    pub fn state(&self) -> VaultState {
        *self.inner.state.read().unwrap()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == VaultState::Unlocked
    }

    pub fn has_session_key(&self) -> bool {
        self.inner.session_key.read().unwrap().is_some()
    }

    pub async fn is_initialized(&self) -> VaultResult<bool> {
        Ok(self.read_salt().await?.is_some())
    }

    /// Subscribes to state changes and lock warnings.
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.inner.events.subscribe()
    }

    /// First-run password setup. Only valid while no password exists; a
    /// later change goes through [`Vault::change_password`] or the recovery
    /// reset.
    pub async fn set_password(&self, password: &str) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        if self.state() != VaultState::SettingPassword {
            return Err(VaultError::AlreadyInitialized);
        }
        self.install_password(password).await?;
        self.finish_unlock().await
    }

    /// Verifies `password` against the check value and opens a session.
    pub async fn unlock(&self, password: &str) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        match self.state() {
            VaultState::Locked | VaultState::AwaitingBiometric => {}
            VaultState::Unlocked => return Ok(()),
            VaultState::Initializing | VaultState::SettingPassword => {
                return Err(VaultError::NotInitialized)
            }
            state => return Err(VaultError::InvalidState { state }),
        }
        self.verify_password(password, true).await?;
        self.finish_unlock().await
    }

    /// Checks a password without opening a session (confirmation prompts
    /// for sensitive settings). Runs the same verification as
    /// [`Vault::unlock`], including the one-time check-value recreation.
    pub async fn check_password(&self, password: &str) -> VaultResult<bool> {
        let _op = self.inner.op_guard.lock().await;
        match self.verify_password(password, false).await {
            Ok(_) => Ok(true),
            Err(VaultError::InvalidPassword) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Verifies `old`, rotates salt and check value under `new`, and locks
    /// the session: the caller must unlock again with the new password.
    pub async fn change_password(&self, old: &str, new: &str) -> VaultResult<()> {
        let _op = self.inner.op_guard.lock().await;
        self.verify_password(old, false).await?;
        self.install_password(new).await?;
        self.force_lock("password change");
        Ok(())
    }

    /// Clears the session key and locks.
    pub async fn logout(&self) {
        let _op = self.inner.op_guard.lock().await;
        if self.state() == VaultState::Unlocked {
            self.force_lock("logout");
        }
    }

    /// Marks user activity, pushing the auto-lock deadline out.
    pub fn record_activity(&self) {
        if self.state() != VaultState::Unlocked {
            return;
        }
        self.inner.autolock.note_activity();
        self.inner.autolock.arm(self.clone());
    }

    /// Reconfigures the inactivity timeout; re-arms if a session is open.
    pub fn set_autolock(&self, config: AutoLockConfig) {
        self.inner.autolock.set_config(config);
        if self.state() == VaultState::Unlocked {
            self.inner.autolock.note_activity();
            self.inner.autolock.arm(self.clone());
        }
    }

    /// Called when the process returns from a suspended/backgrounded state.
    /// Elapsed wall-clock time decides what happens; timers cannot be
    /// trusted to have fired while suspended.
    pub async fn handle_resume(&self) {
        if self.state() != VaultState::Unlocked {
            return;
        }
        match self.inner.autolock.rebase_after_resume() {
            autolock::ResumeAction::LockNow => {
                let _op = self.inner.op_guard.lock().await;
                if self.state() == VaultState::Unlocked {
                    self.force_lock("resumed past inactivity timeout");
                }
            }
            autolock::ResumeAction::RearmWithWarning | autolock::ResumeAction::RearmQuiet => {
                self.inner.autolock.arm(self.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Rotates salt + check value under `password` and installs the session
    /// key. Does not touch the stored collections; they are not encrypted
    /// under the master key.
    pub(crate) async fn install_password(&self, password: &str) -> VaultResult<()> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(VaultError::PasswordTooShort);
        }
        let salt = Salt::random();
        let key = self.derive(password, &salt).await?;
        let check = encrypt(&key, CHECK_VALUE_PLAINTEXT).map_err(VaultError::crypto)?;

        self.write_salt(&salt).await?;
        set_typed(self.inner.store.as_ref(), keys::AUTH_CHECK_VALUE, &check).await?;

        *self.inner.session_key.write().unwrap() = Some(key);
        Ok(())
    }

    /// Derives from the stored salt and checks the password against the
    /// persisted check value. With `install`, a success places the key in
    /// the session slot.
    ///
    /// A missing check value (store imported from a version that predates
    /// it) is recreated under the freshly derived key and treated as a
    /// success. This can happen at most once per stored salt; afterwards
    /// verification is load-bearing again.
    pub(crate) async fn verify_password(
        &self,
        password: &str,
        install: bool,
    ) -> VaultResult<DerivedKey> {
        let salt = self.read_salt().await?.ok_or(VaultError::NotInitialized)?;
        let key = self.derive(password, &salt).await?;

        match get_typed::<EncryptedData>(self.inner.store.as_ref(), keys::AUTH_CHECK_VALUE).await? {
            Some(check) => {
                let plaintext = decrypt(&key, &check).map_err(|_| VaultError::InvalidPassword)?;
                if plaintext != CHECK_VALUE_PLAINTEXT {
                    return Err(VaultError::InvalidPassword);
                }
            }
            None => {
                warn!("check value missing; recreating it from the current password");
                let check = encrypt(&key, CHECK_VALUE_PLAINTEXT).map_err(VaultError::crypto)?;
                set_typed(self.inner.store.as_ref(), keys::AUTH_CHECK_VALUE, &check).await?;
            }
        }

        if install {
            *self.inner.session_key.write().unwrap() = Some(key.clone());
        }
        Ok(key)
    }

    /// Completes a successful authentication: migration pass, state flip,
    /// auto-lock arming. A failed migration clears the session again.
    pub(crate) async fn finish_unlock(&self) -> VaultResult<()> {
        if let Err(err) = self.inner.engine.run().await {
            *self.inner.session_key.write().unwrap() = None;
            return Err(err.into());
        }
        self.transition(VaultState::Unlocked);
        self.inner.autolock.note_activity();
        self.inner.autolock.arm(self.clone());
        Ok(())
    }

    /// Clears the session key, cancels timers, and locks.
    pub(crate) fn force_lock(&self, reason: &str) {
        self.inner.autolock.disarm();
        *self.inner.session_key.write().unwrap() = None;
        info!(reason, "vault locked");
        self.transition(VaultState::Locked);
    }

    /// Timer-driven expiry; re-checks the deadline under the op guard so a
    /// just-recorded activity wins over a stale timer.
    pub(crate) async fn expire(&self) {
        let _op = self.inner.op_guard.lock().await;
        if self.state() == VaultState::Unlocked && self.inner.autolock.deadline_passed() {
            self.force_lock("inactivity timeout");
        }
    }

    pub(crate) fn transition(&self, next: VaultState) {
        let mut state = self.inner.state.write().unwrap();
        if *state != next {
            debug!(from = ?*state, to = ?next, "auth state transition");
            *state = next;
            let _ = self.inner.events.send(VaultEvent::StateChanged(next));
        }
    }

    pub(crate) async fn derive(&self, password: &str, salt: &Salt) -> VaultResult<DerivedKey> {
        let password = password.to_string();
        let salt = salt.clone();
        let params = self.inner.kdf.clone();
        tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
            .await
            .map_err(|e| VaultError::Crypto(format!("kdf task failed: {e}")))?
            .map_err(VaultError::crypto)
    }

    pub(crate) async fn read_salt(&self) -> VaultResult<Option<Salt>> {
        let Some(encoded) =
            get_typed::<String>(self.inner.store.as_ref(), keys::AUTH_SALT).await?
        else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(&encoded)
            .map_err(|e| StoreError::Backend(format!("stored salt unreadable: {e}")))?;
        let bytes: [u8; SALT_SIZE] = bytes
            .try_into()
            .map_err(|_| StoreError::Backend("stored salt has wrong length".to_string()))?;
        Ok(Some(Salt::from_bytes(bytes)))
    }

    pub(crate) async fn write_salt(&self, salt: &Salt) -> VaultResult<()> {
        let encoded = BASE64.encode(salt.as_bytes());
        set_typed(self.inner.store.as_ref(), keys::AUTH_SALT, &encoded).await?;
        Ok(())
    }

    pub(crate) fn store(&self) -> &dyn KeyValueStore {
        self.inner.store.as_ref()
    }
}

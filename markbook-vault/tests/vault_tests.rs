use async_trait::async_trait;
use markbook_store::{keys, KeyValueStore, MemoryStore};
use markbook_vault::{
    AutoLockConfig, BiometricUnlock, BridgeError, BridgeResult, CredentialBridge, Vault,
    VaultError, VaultEvent, VaultState,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockBridge {
    unsupported: bool,
    fail_store: bool,
    fail_retrieve: bool,
    credential: Mutex<Option<String>>,
}

#[async_trait]
impl CredentialBridge for MockBridge {
    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    async fn store_credential(&self, payload: &str) -> BridgeResult<()> {
        if self.fail_store {
            return Err(BridgeError("mock store failure".to_string()));
        }
        *self.credential.lock().unwrap() = Some(payload.to_string());
        Ok(())
    }

    async fn retrieve_credential(&self) -> BridgeResult<Option<String>> {
        if self.fail_retrieve {
            return Err(BridgeError("mock retrieve failure".to_string()));
        }
        Ok(self.credential.lock().unwrap().clone())
    }

    async fn remove_credential(&self) -> BridgeResult<()> {
        *self.credential.lock().unwrap() = None;
        Ok(())
    }
}

fn vault_over(store: Arc<MemoryStore>, bridge: Arc<MockBridge>) -> Vault {
    Vault::new(store, bridge, AutoLockConfig::disabled())
}

async fn set_up_vault(password: &str) -> (Vault, Arc<MemoryStore>, Arc<MockBridge>) {
    let store = Arc::new(MemoryStore::new());
    let bridge = Arc::new(MockBridge::default());
    let vault = vault_over(store.clone(), bridge.clone());
    vault.start().await.unwrap();
    vault.set_password(password).await.unwrap();
    (vault, store, bridge)
}

#[tokio::test]
async fn first_run_sets_password_and_unlocks() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault_over(store.clone(), Arc::new(MockBridge::default()));

    assert_eq!(vault.start().await.unwrap(), VaultState::SettingPassword);

    vault.set_password("Secret-enough-1").await.unwrap();
    assert_eq!(vault.state(), VaultState::Unlocked);
    assert!(vault.has_session_key());

    // Salt, check value, and schema version are persisted.
    assert!(store.get(keys::AUTH_SALT).await.unwrap().is_some());
    assert!(store.get(keys::AUTH_CHECK_VALUE).await.unwrap().is_some());
    assert_eq!(
        store.get(keys::DB_VERSION).await.unwrap(),
        Some(json!(markbook_store::CURRENT_DB_VERSION))
    );
}

#[tokio::test]
async fn restart_lands_in_locked() {
    let (_, store, bridge) = set_up_vault("Secret-enough-1").await;

    let vault = vault_over(store, bridge);
    assert_eq!(vault.start().await.unwrap(), VaultState::Locked);
    assert!(!vault.has_session_key());
}

#[tokio::test]
async fn set_password_twice_is_rejected() {
    let (vault, _, _) = set_up_vault("Secret-enough-1").await;
    assert!(matches!(
        vault.set_password("Another-pass-2").await,
        Err(VaultError::AlreadyInitialized)
    ));
}

#[tokio::test]
async fn short_password_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault_over(store, Arc::new(MockBridge::default()));
    vault.start().await.unwrap();
    assert!(matches!(
        vault.set_password("short").await,
        Err(VaultError::PasswordTooShort)
    ));
    assert_eq!(vault.state(), VaultState::SettingPassword);
}

#[tokio::test]
async fn wrong_password_is_rejected_and_keeps_locked() {
    let (_, store, bridge) = set_up_vault("Secret-enough-1").await;

    let vault = vault_over(store, bridge);
    vault.start().await.unwrap();

    assert!(matches!(
        vault.unlock("Wrong-password-9").await,
        Err(VaultError::InvalidPassword)
    ));
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(!vault.has_session_key());

    vault.unlock("Secret-enough-1").await.unwrap();
    assert_eq!(vault.state(), VaultState::Unlocked);
    assert!(vault.has_session_key());
}

#[tokio::test]
async fn logout_clears_the_session_key() {
    let (vault, _, _) = set_up_vault("Secret-enough-1").await;
    vault.logout().await;
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(!vault.has_session_key());
}

#[tokio::test]
async fn missing_check_value_self_heals_at_most_once() {
    let (vault, store, bridge) = set_up_vault("OriginalPass99").await;
    vault.logout().await;

    // Simulate a store imported from a version without check values.
    store
        .set(keys::AUTH_CHECK_VALUE, Value::Null)
        .await
        .unwrap();

    // First verification cannot be cryptographically load-bearing: the
    // check value is recreated under whatever password arrives.
    let vault = vault_over(store.clone(), bridge);
    vault.start().await.unwrap();
    vault.unlock("DifferentPass99").await.unwrap();
    assert_eq!(vault.state(), VaultState::Unlocked);
    vault.logout().await;

    // From now on verification is real again: the original password no
    // longer matches the healed check value.
    assert!(matches!(
        vault.unlock("OriginalPass99").await,
        Err(VaultError::InvalidPassword)
    ));
    vault.unlock("DifferentPass99").await.unwrap();
}

#[tokio::test]
async fn change_password_rotates_salt_and_forces_relock() {
    let (vault, store, _) = set_up_vault("Old-password-1").await;
    let old_salt = store.get(keys::AUTH_SALT).await.unwrap();

    vault
        .change_password("Old-password-1", "New-password-2")
        .await
        .unwrap();

    assert_eq!(vault.state(), VaultState::Locked);
    assert!(!vault.has_session_key());
    assert_ne!(store.get(keys::AUTH_SALT).await.unwrap(), old_salt);

    assert!(matches!(
        vault.unlock("Old-password-1").await,
        Err(VaultError::InvalidPassword)
    ));
    vault.unlock("New-password-2").await.unwrap();
}

#[tokio::test]
async fn change_password_requires_the_old_one() {
    let (vault, _, _) = set_up_vault("Old-password-1").await;
    assert!(matches!(
        vault.change_password("Guessed-wrong-1", "New-password-2").await,
        Err(VaultError::InvalidPassword)
    ));
    // The failed attempt leaves the open session untouched.
    assert_eq!(vault.state(), VaultState::Unlocked);
}

#[tokio::test]
async fn recovery_reset_sets_a_new_password() {
    let (vault, store, bridge) = set_up_vault("Forgotten-pass-1").await;

    let phrase = vault.setup_recovery().await.unwrap();
    assert_eq!(phrase.words().len(), 12);
    assert!(vault.has_recovery().await.unwrap());
    assert!(vault.verify_recovery_phrase(phrase.as_str()).await.unwrap());
    assert!(!vault
        .verify_recovery_phrase("wrong words entirely")
        .await
        .unwrap());

    // Fresh start: the user forgot the password.
    let vault = vault_over(store, bridge);
    vault.start().await.unwrap();
    vault.begin_recovery().await.unwrap();
    assert_eq!(vault.state(), VaultState::Recovering);

    assert!(matches!(
        vault.reset_password("not the phrase", "Replacement-1").await,
        Err(VaultError::InvalidRecoveryPhrase)
    ));

    vault
        .reset_password(phrase.as_str(), "Replacement-1")
        .await
        .unwrap();
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(!vault.has_session_key());

    assert!(matches!(
        vault.unlock("Forgotten-pass-1").await,
        Err(VaultError::InvalidPassword)
    ));
    vault.unlock("Replacement-1").await.unwrap();
}

#[tokio::test]
async fn recovery_requires_prior_setup() {
    let (vault, _, _) = set_up_vault("Secret-enough-1").await;
    vault.logout().await;
    assert!(matches!(
        vault.begin_recovery().await,
        Err(VaultError::RecoveryNotConfigured)
    ));
}

#[tokio::test]
async fn enable_biometrics_distinguishes_wrong_password_from_bridge_failure() {
    let (vault, store, bridge) = set_up_vault("Secret-enough-1").await;

    assert!(matches!(
        vault.enable_biometric_unlock("Wrong-password-9").await,
        Err(VaultError::InvalidPassword)
    ));
    assert!(bridge.credential.lock().unwrap().is_none());

    let failing = Arc::new(MockBridge {
        fail_store: true,
        ..MockBridge::default()
    });
    let vault = vault_over(store.clone(), failing);
    vault.start().await.unwrap();
    vault.unlock("Secret-enough-1").await.unwrap();
    assert!(matches!(
        vault.enable_biometric_unlock("Secret-enough-1").await,
        Err(VaultError::BiometricUnavailable(_))
    ));
    assert_eq!(
        store.get(keys::BIOMETRIC_ENABLED).await.unwrap(),
        Some(json!(false))
    );
}

#[tokio::test]
async fn biometric_unlock_roundtrip() {
    let (vault, store, bridge) = set_up_vault("Secret-enough-1").await;
    vault
        .enable_biometric_unlock("Secret-enough-1")
        .await
        .unwrap();
    assert_eq!(
        store.get(keys::BIOMETRIC_ENABLED).await.unwrap(),
        Some(json!(true))
    );

    // App restart: the enabled flag routes startup to biometric-first.
    let vault = vault_over(store, bridge);
    assert_eq!(vault.start().await.unwrap(), VaultState::AwaitingBiometric);
    assert_eq!(
        vault.try_biometric_unlock().await.unwrap(),
        BiometricUnlock::Unlocked
    );
    assert_eq!(vault.state(), VaultState::Unlocked);
}

#[tokio::test]
async fn biometric_unlock_falls_back_without_credential() {
    let (vault, store, _) = set_up_vault("Secret-enough-1").await;
    vault
        .enable_biometric_unlock("Secret-enough-1")
        .await
        .unwrap();

    // A different (empty) bridge simulates a wiped platform store.
    let vault = vault_over(store, Arc::new(MockBridge::default()));
    assert_eq!(vault.start().await.unwrap(), VaultState::AwaitingBiometric);
    assert_eq!(
        vault.try_biometric_unlock().await.unwrap(),
        BiometricUnlock::FellBack
    );
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn biometric_unlock_falls_back_on_stale_credential() {
    let (vault, store, bridge) = set_up_vault("Secret-enough-1").await;
    vault
        .enable_biometric_unlock("Secret-enough-1")
        .await
        .unwrap();
    vault
        .change_password("Secret-enough-1", "Rotated-pass-2")
        .await
        .unwrap();

    // The bridge still wraps the pre-rotation password.
    let vault = vault_over(store, bridge);
    assert_eq!(vault.start().await.unwrap(), VaultState::AwaitingBiometric);
    assert_eq!(
        vault.try_biometric_unlock().await.unwrap(),
        BiometricUnlock::FellBack
    );
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test]
async fn disable_biometrics_clears_flag_and_credential() {
    let (vault, store, bridge) = set_up_vault("Secret-enough-1").await;
    vault
        .enable_biometric_unlock("Secret-enough-1")
        .await
        .unwrap();

    vault.disable_biometric_unlock().await.unwrap();
    assert_eq!(
        store.get(keys::BIOMETRIC_ENABLED).await.unwrap(),
        Some(json!(false))
    );
    assert!(bridge.credential.lock().unwrap().is_none());
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<VaultEvent>) -> Vec<VaultEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn idle_session_warns_then_locks() {
    let store = Arc::new(MemoryStore::new());
    let vault = Vault::new(
        store,
        Arc::new(MockBridge::default()),
        AutoLockConfig::from_millis(300_000),
    );
    let mut rx = vault.subscribe();

    vault.start().await.unwrap();
    vault.set_password("Secret-enough-1").await.unwrap();

    // 250s idle: the warning (due at 240s) has fired, the lock has not.
    tokio::time::sleep(Duration::from_millis(250_000)).await;
    let events = drain(&mut rx);
    assert!(events.contains(&VaultEvent::LockWarning));
    assert_eq!(vault.state(), VaultState::Unlocked);

    // 60s more without activity: the 300s deadline forces a logout.
    tokio::time::sleep(Duration::from_millis(60_001)).await;
    assert_eq!(vault.state(), VaultState::Locked);
    assert!(!vault.has_session_key());
    assert!(drain(&mut rx).contains(&VaultEvent::StateChanged(VaultState::Locked)));
}

#[tokio::test(start_paused = true)]
async fn activity_pushes_the_deadline_out() {
    let store = Arc::new(MemoryStore::new());
    let vault = Vault::new(
        store,
        Arc::new(MockBridge::default()),
        AutoLockConfig::from_millis(300_000),
    );
    vault.start().await.unwrap();
    vault.set_password("Secret-enough-1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200_000)).await;
    vault.record_activity();

    // 200s after the activity reset the session is still open...
    tokio::time::sleep(Duration::from_millis(200_000)).await;
    assert_eq!(vault.state(), VaultState::Unlocked);

    // ...but 300s after it, it is gone.
    tokio::time::sleep(Duration::from_millis(100_001)).await;
    assert_eq!(vault.state(), VaultState::Locked);
}

#[tokio::test(start_paused = true)]
async fn disabled_autolock_never_fires() {
    let store = Arc::new(MemoryStore::new());
    let vault = Vault::new(
        store,
        Arc::new(MockBridge::default()),
        AutoLockConfig::disabled(),
    );
    vault.start().await.unwrap();
    vault.set_password("Secret-enough-1").await.unwrap();

    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(vault.state(), VaultState::Unlocked);
}

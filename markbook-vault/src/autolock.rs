//! Inactivity auto-lock.
//!
//! A single authoritative last-activity record (monotonic instant for
//! timers, wall-clock milliseconds for resume decisions) drives one
//! cancellable timer task: a warning fires one minute before the deadline,
//! the deadline forces a logout. The task is aborted and respawned on every
//! activity signal so a stale timer can never fire into a newer session
//! state. Timer delivery is not trusted across process suspension;
//! [`AutoLock::rebase_after_resume`] recomputes elapsed time from the wall
//! clock instead.

use crate::{Vault, VaultEvent};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Warning lead time before the lock deadline.
pub const WARNING_LEAD: Duration = Duration::from_secs(60);

/// Inactivity timeout configuration, the only tunable of the vault core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoLockConfig {
    timeout: Option<Duration>,
}

impl AutoLockConfig {
    /// Smallest enforced timeout.
    pub const MIN_TIMEOUT: Duration = Duration::from_secs(60);

    /// `0` disables auto-lock entirely; any other value is clamped up to
    /// one minute.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::disabled()
        } else {
            Self {
                timeout: Some(Duration::from_millis(ms).max(Self::MIN_TIMEOUT)),
            }
        }
    }

    pub fn disabled() -> Self {
        Self { timeout: None }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[derive(Clone, Copy)]
struct ActivityMark {
    instant: Instant,
    wall_ms: i64,
}

/// What to do after returning from suspension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResumeAction {
    /// The timeout elapsed while suspended; lock without waiting.
    LockNow,
    /// Inside the warning window; re-arm (the warning fires immediately).
    RearmWithWarning,
    /// Still comfortably inside the timeout; re-arm silently.
    RearmQuiet,
}

pub(crate) struct AutoLock {
    config: Mutex<AutoLockConfig>,
    last_activity: Mutex<ActivityMark>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl AutoLock {
    pub(crate) fn new(config: AutoLockConfig) -> Self {
        Self {
            config: Mutex::new(config),
            last_activity: Mutex::new(ActivityMark {
                instant: Instant::now(),
                wall_ms: now_wall_ms(),
            }),
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn set_config(&self, config: AutoLockConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub(crate) fn note_activity(&self) {
        *self.last_activity.lock().unwrap() = ActivityMark {
            instant: Instant::now(),
            wall_ms: now_wall_ms(),
        };
    }

    /// Spawns the warning/lock timer anchored at the last activity mark,
    /// replacing any previous timer.
    pub(crate) fn arm(&self, vault: Vault) {
        self.disarm();

        let Some(timeout) = self.config.lock().unwrap().timeout() else {
            return;
        };
        let anchor = self.last_activity.lock().unwrap().instant;
        let lock_deadline = anchor + timeout;
        // Timeouts of a minute or less lock without a separate warning.
        let warn_deadline = (timeout > WARNING_LEAD).then(|| lock_deadline - WARNING_LEAD);

        let events = vault.inner.events.clone();
        let handle = tokio::spawn(async move {
            if let Some(at) = warn_deadline {
                tokio::time::sleep_until(at).await;
                debug!("inactivity warning");
                let _ = events.send(VaultEvent::LockWarning);
            }
            tokio::time::sleep_until(lock_deadline).await;
            vault.expire().await;
        });

        *self.timer.lock().unwrap() = Some(handle);
    }

    /// Cancels the pending timer, if any.
    pub(crate) fn disarm(&self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Whether the lock deadline has passed relative to the last activity.
    pub(crate) fn deadline_passed(&self) -> bool {
        let Some(timeout) = self.config.lock().unwrap().timeout() else {
            return false;
        };
        let anchor = self.last_activity.lock().unwrap().instant;
        Instant::now() >= anchor + timeout
    }

    /// Recomputes elapsed time from the wall clock and rebases the
    /// monotonic anchor accordingly, so deadlines derived from it reflect
    /// real elapsed time rather than whatever the suspended timers saw.
    pub(crate) fn rebase_after_resume(&self) -> ResumeAction {
        let config = *self.config.lock().unwrap();
        let mut mark = self.last_activity.lock().unwrap();
        let elapsed_ms = (now_wall_ms() - mark.wall_ms).max(0) as u64;
        let elapsed = Duration::from_millis(elapsed_ms);

        mark.instant = Instant::now()
            .checked_sub(elapsed)
            .unwrap_or_else(Instant::now);

        plan_resume(config, elapsed)
    }
}

/// Pure resume decision, separated from clock access for testability.
pub(crate) fn plan_resume(config: AutoLockConfig, elapsed: Duration) -> ResumeAction {
    match config.timeout() {
        None => ResumeAction::RearmQuiet,
        Some(timeout) if elapsed >= timeout => ResumeAction::LockNow,
        Some(timeout) if timeout > WARNING_LEAD && elapsed >= timeout - WARNING_LEAD => {
            ResumeAction::RearmWithWarning
        }
        Some(_) => ResumeAction::RearmQuiet,
    }
}

fn now_wall_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

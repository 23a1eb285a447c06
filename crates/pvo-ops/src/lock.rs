use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock release mismatch: held by {held:?}, release requested by '{requested}'")]
    Mismatch {
        held: Option<String>,
        requested: String,
    },
}

#[derive(Debug, Clone)]
struct Holder {
    name: String,
    since: DateTime<Utc>,
}

/// Process-wide single-flight lock.
///
/// `acquire` is non-blocking: a second caller gets `false` immediately.
#[derive(Debug, Default)]
pub struct OperationLock {
    holder: Mutex<Option<Holder>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, name: &str) -> bool {
        self.try_acquire(name).is_ok()
    }

    /// Like [`acquire`](Self::acquire) but reports the current holder on
    /// refusal, read under the same critical section as the check.
    pub fn try_acquire(&self, name: &str) -> Result<(), String> {
        let mut slot = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = slot.as_ref() {
            warn!(
                requested = %name,
                held = %h.name,
                since = %h.since.to_rfc3339(),
                "operation blocked: lock already held"
            );
            return Err(h.name.clone());
        }
        *slot = Some(Holder {
            name: name.to_string(),
            since: Utc::now(),
        });
        info!(operation = %name, "operation lock acquired");
        Ok(())
    }

    /// Release the lock held under `name`.
    ///
    /// A release under any other name leaves the lock untouched.
    pub fn release(&self, name: &str) -> Result<(), LockError> {
        let mut slot = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(h) if h.name == name => {
                *slot = None;
                info!(operation = %name, "operation lock released");
                Ok(())
            }
            other => {
                let held = other.map(|h| h.name.clone());
                error!(held = ?held, requested = %name, "lock release mismatch");
                Err(LockError::Mismatch {
                    held,
                    requested: name.to_string(),
                })
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn current_operation(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| h.name.clone())
    }

    pub fn held_since(&self) -> Option<DateTime<Utc>> {
        self.holder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| h.since)
    }
}

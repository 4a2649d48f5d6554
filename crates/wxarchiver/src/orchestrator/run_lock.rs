//! Single-holder run lock with stale-holder recovery.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunLock {
    pub holder_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunLock {
    /// Time held as of `now`; zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the lock. `cleared_stale` is the abandoned lock
    /// that had to be force-cleared first, if any.
    Acquired {
        lock: RunLock,
        cleared_stale: Option<RunLock>,
    },
    /// Someone else holds a lock that is not yet stale.
    Busy { holder: RunLock, age: Duration },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

/// The process-wide slot a [`RunLock`] lives in.
#[derive(Debug, Default)]
pub struct RunLockSlot {
    held: Mutex<Option<RunLock>>,
}

impl RunLockSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunLock>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the lock for `holder_id`, or reports who has it. A lock at least
    /// `stale_after` old is presumed abandoned and replaced.
    pub fn try_acquire(
        &self,
        holder_id: Uuid,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> AcquireOutcome {
        let mut slot = self.slot();

        let cleared_stale = match *slot {
            Some(holder) => {
                let age = holder.age(now);
                if age < stale_after {
                    return AcquireOutcome::Busy { holder, age };
                }
                Some(holder)
            }
            None => None,
        };

        let lock = RunLock {
            holder_id,
            started_at: now,
        };
        *slot = Some(lock);
        AcquireOutcome::Acquired {
            lock,
            cleared_stale,
        }
    }

    /// Releases the lock if `holder_id` still holds it. A holder whose lock
    /// was force-cleared releases nothing.
    pub fn release(&self, holder_id: Uuid) -> bool {
        let mut slot = self.slot();
        match *slot {
            Some(lock) if lock.holder_id == holder_id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<RunLock> {
        *self.slot()
    }

    pub fn is_held(&self) -> bool {
        self.current().is_some()
    }
}

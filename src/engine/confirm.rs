//! Two-step confirmation guarding bulk deletes.
//!
//! A `request` arms a deadline for `(group, user)`; a `confirm` before the
//! deadline consumes it. Expiry is enforced lazily at confirm time, and
//! `evict_expired` lets an external timer prune stale entries.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::domain::{GroupId, TimeMs};

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmKey {
    pub group_id: GroupId,
    pub user_id: String,
}

impl ConfirmKey {
    pub fn new(group_id: GroupId, user_id: impl Into<String>) -> Self {
        Self {
            group_id,
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// A pending request was confirmed in time; the caller may proceed.
    Confirmed,
    /// A request existed but its deadline had passed. It is now cleared.
    Expired,
    /// Nothing was pending. Not an error.
    NoRequest,
}

#[derive(Debug)]
pub struct ConfirmationHandshake {
    timeout: Duration,
    deadlines: Mutex<HashMap<ConfirmKey, TimeMs>>,
}

impl ConfirmationHandshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm (or re-arm) the deadline for `key`. Returns the deadline.
    pub fn request(&self, key: ConfirmKey, now: TimeMs) -> TimeMs {
        let timeout_ms = i64::try_from(self.timeout.as_millis()).unwrap_or(i64::MAX);
        let deadline = TimeMs::new(now.as_ms().saturating_add(timeout_ms));
        self.deadlines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, deadline);
        deadline
    }

    pub fn confirm(&self, key: &ConfirmKey, now: TimeMs) -> ConfirmOutcome {
        let removed = self
            .deadlines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            None => ConfirmOutcome::NoRequest,
            Some(deadline) if now <= deadline => ConfirmOutcome::Confirmed,
            Some(_) => ConfirmOutcome::Expired,
        }
    }

    pub fn is_pending(&self, key: &ConfirmKey) -> bool {
        self.deadlines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Drop every entry whose deadline is before `now`. Returns how many were dropped.
    pub fn evict_expired(&self, now: TimeMs) -> usize {
        let mut deadlines = self.deadlines.lock().unwrap_or_else(PoisonError::into_inner);
        let before = deadlines.len();
        deadlines.retain(|_, deadline| now <= *deadline);
        before - deadlines.len()
    }
}

impl Default for ConfirmationHandshake {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_TIMEOUT)
    }
}

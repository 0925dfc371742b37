//! Per-business-day critical sections.
//!
//! Every apply/reverse holds the lock of the one date it touches across the
//! whole read-modify-write of the group row and the totals row. Rebuild takes
//! the locks of every date in its range, always in ascending order, which
//! drains in-flight folds on those dates and keeps lock acquisition acyclic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::BusinessDate;

type Slots = Arc<Mutex<HashMap<BusinessDate, Arc<AsyncMutex<()>>>>>;

/// Lazily created per-date mutexes. A date's slot exists only while someone
/// holds or awaits its lock.
#[derive(Debug, Default)]
pub struct DayLocks {
    slots: Slots,
}

/// One held date lock. Releasing it drops the slot when nobody else holds a
/// reference to it.
#[derive(Debug)]
struct Held {
    date: BusinessDate,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Held {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Unlock first: the guard owns one reference to the slot.
        drop(self.guard.take());
        if slots
            .get(&self.date)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.date);
        }
    }
}

/// Exclusive access to one business day.
#[derive(Debug)]
pub struct DayGuard {
    pub date: BusinessDate,
    _held: Held,
}

/// Exclusive access to every business day in a range.
#[derive(Debug)]
pub struct RangeGuard {
    pub start: BusinessDate,
    pub end: BusinessDate,
    _held: Vec<Held>,
}

impl DayLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, date: BusinessDate) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(date)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn hold(&self, date: BusinessDate) -> Held {
        let guard = self.slot(date).lock_owned().await;
        Held {
            date,
            slots: self.slots.clone(),
            guard: Some(guard),
        }
    }

    pub async fn lock_day(&self, date: BusinessDate) -> DayGuard {
        DayGuard {
            date,
            _held: self.hold(date).await,
        }
    }

    pub async fn lock_range(&self, start: BusinessDate, end: BusinessDate) -> RangeGuard {
        let mut held = Vec::new();
        for date in start.iter_through(end) {
            held.push(self.hold(date).await);
        }
        RangeGuard {
            start,
            end,
            _held: held,
        }
    }

    /// Number of dates currently locked or awaited.
    pub fn tracked_days(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

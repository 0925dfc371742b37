//! Two-step bulk delete of a group's current business day.

use super::{Ledger, LedgerError};
use crate::domain::{GroupId, TimeMs};
use crate::engine::{ConfirmKey, ConfirmOutcome};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkDeleteOutcome {
    /// The day's transactions are gone and its aggregates rebuilt.
    Confirmed { deleted: u64 },
    Expired,
    NoRequest,
}

impl Ledger {
    /// Arm a bulk delete for `(group, user)`. Returns the confirmation deadline.
    pub fn request_bulk_delete(&self, group_id: GroupId, user_id: &str) -> TimeMs {
        self.request_bulk_delete_at(group_id, user_id, TimeMs::now())
    }

    pub fn request_bulk_delete_at(&self, group_id: GroupId, user_id: &str, now: TimeMs) -> TimeMs {
        let deadline = self
            .handshake
            .request(ConfirmKey::new(group_id.clone(), user_id), now);
        info!(group_id = %group_id, user_id, deadline_ms = deadline.as_ms(), "Bulk delete requested");
        deadline
    }

    /// # Errors
    /// Only a confirmed request touches the store; its errors are returned as is.
    pub async fn confirm_bulk_delete(
        &self,
        group_id: GroupId,
        user_id: &str,
    ) -> Result<BulkDeleteOutcome, LedgerError> {
        self.confirm_bulk_delete_at(group_id, user_id, TimeMs::now())
            .await
    }

    /// Confirm at `now`. On `Confirmed`, deletes every transaction of the group
    /// in the business day containing `now` and rebuilds that day, atomically.
    pub async fn confirm_bulk_delete_at(
        &self,
        group_id: GroupId,
        user_id: &str,
        now: TimeMs,
    ) -> Result<BulkDeleteOutcome, LedgerError> {
        let key = ConfirmKey::new(group_id.clone(), user_id);
        match self.handshake.confirm(&key, now) {
            ConfirmOutcome::Confirmed => {}
            ConfirmOutcome::Expired => {
                info!(group_id = %group_id, user_id, "Bulk delete confirmation expired");
                return Ok(BulkDeleteOutcome::Expired);
            }
            ConfirmOutcome::NoRequest => return Ok(BulkDeleteOutcome::NoRequest),
        }

        let today = self.clock.today_key(now)?;
        let window = self.clock.window_for(today);
        let live = self.live_rates().await?;
        let _day = self.locks.lock_day(today).await;

        let deleted = self
            .with_conflict_retry("bulk_delete", || async {
                let configs = self.group_configs_in(window).await?;
                let mut uow = self.repo.begin().await?;
                let deleted = uow.delete_group_window(&group_id, window).await?;
                self.rebuild_in(&mut uow, today, today, &configs, &live).await?;
                uow.commit().await?;
                Ok(deleted)
            })
            .await?;

        info!(
            group_id = %group_id,
            user_id,
            business_date = %today,
            deleted,
            "Bulk delete confirmed"
        );
        Ok(BulkDeleteOutcome::Confirmed { deleted })
    }
}

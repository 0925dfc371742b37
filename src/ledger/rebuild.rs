//! Rebuild: recompute aggregates for a date range straight from the ledger.

use super::{check_range, Ledger, LedgerError};
use crate::db::UnitOfWork;
use crate::domain::{BusinessDate, GroupConfig, GroupId};
use crate::engine::{transaction_delta, DayFold, FoldRates, LiveRates};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Widest range one rebuild may cover, in business days. Each day in the range
/// is locked for the whole rebuild.
pub const MAX_REBUILD_SPAN_DAYS: i64 = 366;

/// What a rebuild wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub start_date: BusinessDate,
    pub end_date: BusinessDate,
    /// Aggregate rows (group and totals) removed before recomputing.
    pub rows_deleted: u64,
    /// Dates that ended up with at least one transaction.
    pub days_written: usize,
    pub groups_written: usize,
    pub transactions_folded: usize,
}

impl Ledger {
    /// Replace every aggregate dated in `[start, end]` with a fresh fold of the
    /// surviving transactions. Dates without transactions get no rows.
    ///
    /// Holds the day lock of every date in the range, so folds on those dates
    /// wait and folds on other dates proceed.
    ///
    /// # Errors
    /// `Validation` if `start > end`, the range spans more than
    /// [`MAX_REBUILD_SPAN_DAYS`], or a stored transaction cannot be folded.
    pub async fn rebuild_range(
        &self,
        start: BusinessDate,
        end: BusinessDate,
    ) -> Result<RebuildReport, LedgerError> {
        check_range(start, end)?;
        let span = (end.naive() - start.naive()).num_days() + 1;
        if span > MAX_REBUILD_SPAN_DAYS {
            return Err(LedgerError::Validation(format!(
                "rebuild covers {} days, at most {} allowed",
                span, MAX_REBUILD_SPAN_DAYS
            )));
        }
        let live = self.live_rates().await?;
        let _range = self.locks.lock_range(start, end).await;

        let report = self
            .with_conflict_retry("rebuild", || async {
                let configs = self
                    .group_configs_in(self.clock.window_for_range(start, end))
                    .await?;
                let mut uow = self.repo.begin().await?;
                let report = self.rebuild_in(&mut uow, start, end, &configs, &live).await?;
                uow.commit().await?;
                Ok(report)
            })
            .await?;

        info!(
            start_date = %start,
            end_date = %end,
            days = report.days_written,
            groups = report.groups_written,
            transactions = report.transactions_folded,
            "Aggregates rebuilt"
        );
        Ok(report)
    }

    /// Rebuild inside an open unit of work. The caller holds the day locks.
    pub(super) async fn rebuild_in(
        &self,
        uow: &mut UnitOfWork,
        start: BusinessDate,
        end: BusinessDate,
        configs: &HashMap<GroupId, GroupConfig>,
        live: &LiveRates,
    ) -> Result<RebuildReport, LedgerError> {
        let mut report = RebuildReport {
            start_date: start,
            end_date: end,
            rows_deleted: uow.delete_aggregates_in_range(start, end).await?,
            days_written: 0,
            groups_written: 0,
            transactions_folded: 0,
        };

        for date in start.iter_through(end) {
            let transactions = uow.find_by_window(self.clock.window_for(date)).await?;
            let mut day = DayFold::new(date);
            for tx in &transactions {
                let Some(group) = configs.get(&tx.group_id) else {
                    // Written by someone else after the configs were read.
                    debug!(tx_id = tx.id, group_id = %tx.group_id, "Unseen group during rebuild");
                    return Err(LedgerError::ConcurrencyConflict { attempts: 1 });
                };
                let delta = transaction_delta(tx, &FoldRates::resolve(tx, group, live))?;
                day.push(tx, &delta)?;
            }

            let folded = day.folded();
            let Some(summary) = day.finish() else {
                continue;
            };
            for row in &summary.groups {
                uow.save_group_aggregate(row).await?;
            }
            uow.save_daily_totals(&summary.totals).await?;

            debug!(
                business_date = %date,
                groups = summary.groups.len(),
                transactions = folded,
                "Business day rebuilt"
            );
            report.days_written += 1;
            report.groups_written += summary.groups.len();
            report.transactions_folded += folded;
        }
        Ok(report)
    }
}

//! Cancellation: reverse a transaction's contribution, then delete it.

use super::{fold_rows, Ledger, LedgerError};
use crate::domain::{GroupId, TimeMs, Transaction};
use crate::engine::{transaction_delta, FoldDirection, FoldRates};
use tracing::{info, warn};

/// How the caller names the transaction to cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    /// Primary key, any date.
    Id(i64),
    /// External reference within the group's current business day.
    ExternalRef { group_id: GroupId, external_ref: i64 },
}

impl Ledger {
    /// # Errors
    /// `NotFound` if the transaction does not exist, or if its aggregate rows
    /// are missing (a consistency violation; nothing is changed).
    pub async fn cancel_transaction(&self, target: CancelTarget) -> Result<Transaction, LedgerError> {
        self.cancel_transaction_at(target, TimeMs::now()).await
    }

    /// Same as [`Ledger::cancel_transaction`], resolving "today" from `now`.
    pub async fn cancel_transaction_at(
        &self,
        target: CancelTarget,
        now: TimeMs,
    ) -> Result<Transaction, LedgerError> {
        let (date, group_id) = match &target {
            CancelTarget::Id(id) => {
                let tx = self
                    .repo
                    .get_transaction(*id)
                    .await?
                    .ok_or_else(|| not_found(&target))?;
                (tx.business_date, tx.group_id)
            }
            CancelTarget::ExternalRef { group_id, .. } => {
                (self.clock.today_key(now)?, group_id.clone())
            }
        };
        let window = self.clock.window_for(date);

        let group = self.rates.group_config(&group_id).await?;
        let live = self.live_rates().await?;
        let _day = self.locks.lock_day(date).await;

        let cancelled = self
            .with_conflict_retry("cancel", || async {
                let mut uow = self.repo.begin().await?;
                let tx = match &target {
                    CancelTarget::Id(id) => uow.get_transaction(*id).await?,
                    CancelTarget::ExternalRef {
                        group_id,
                        external_ref,
                    } => uow.find_by_external_ref(group_id, *external_ref, window).await?,
                };
                let tx = tx.ok_or_else(|| not_found(&target))?;

                let delta = transaction_delta(&tx, &FoldRates::resolve(&tx, &group, &live))?;
                fold_rows(&mut uow, &tx, FoldDirection::Reverse, &delta).await?;
                uow.delete_transaction(tx.id).await?;
                uow.commit().await?;
                Ok(tx)
            })
            .await?;

        info!(
            tx_id = cancelled.id,
            kind = %cancelled.kind,
            group_id = %cancelled.group_id,
            business_date = %cancelled.business_date,
            "Transaction cancelled"
        );
        Ok(cancelled)
    }
}

fn not_found(target: &CancelTarget) -> LedgerError {
    let what = match target {
        CancelTarget::Id(id) => format!("transaction {}", id),
        CancelTarget::ExternalRef {
            group_id,
            external_ref,
        } => format!("transaction with ref {} in group {} today", external_ref, group_id),
    };
    warn!(cancel_target = %what, "Cancel target not found");
    LedgerError::NotFound(what)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::{AggregateSums, GlobalRate, RecordAmount, RecordRequest};
    use crate::rates::MockRateProvider;
    use std::sync::Arc;

    fn payout(group: &str, local: &str, external_ref: i64) -> RecordRequest {
        RecordRequest::new(
            GroupId::new(group),
            RecordAmount::ProxyPayout {
                local_amount: d(local),
            },
        )
        .at(TimeMs::new(MIDDAY_2024_03_10))
        .with_external_ref(external_ref)
    }

    #[tokio::test]
    async fn test_cancel_by_id_returns_aggregates_to_zero() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;

        let tx = ledger.record_transaction(payout("g1", "1000000", 7)).await.unwrap();
        let cancelled = ledger.cancel_transaction(CancelTarget::Id(tx.id)).await.unwrap();
        assert_eq!(cancelled, tx);

        let row = ledger
            .get_group_aggregate(date("2024-03-10"), &GroupId::new("g1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.sums, AggregateSums::zero());
        let totals = ledger.get_daily_totals(date("2024-03-10")).await.unwrap().unwrap();
        assert!(totals.sums.is_zero());
        assert!(ledger.repository().get_transaction(tx.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_uses_frozen_buy_rate_after_rate_change() {
        let provider = Arc::new(
            MockRateProvider::new()
                .with_group(group_config("g1"))
                .with_global_rate(GlobalRate::BuyRate, d("16300")),
        );
        let (ledger, _temp) = setup_ledger(provider.clone()).await;

        let keep = ledger.record_transaction(payout("g1", "500000", 1)).await.unwrap();
        let before = ledger
            .get_group_aggregate(date("2024-03-10"), &GroupId::new("g1"))
            .await
            .unwrap()
            .unwrap();
        let gone = ledger.record_transaction(payout("g1", "1000000", 2)).await.unwrap();

        provider.set_global_rate(GlobalRate::BuyRate, d("17000"));
        ledger.cancel_transaction(CancelTarget::Id(gone.id)).await.unwrap();

        let after = ledger
            .get_group_aggregate(date("2024-03-10"), &GroupId::new("g1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.sums, before.sums);
        assert_eq!(keep.buy_rate, Some(d("16300")));
    }

    #[tokio::test]
    async fn test_cancel_by_external_ref_searches_today_only() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;
        let tx = ledger.record_transaction(payout("g1", "1000", 42)).await.unwrap();

        let target = CancelTarget::ExternalRef {
            group_id: GroupId::new("g1"),
            external_ref: 42,
        };
        let next_day = TimeMs::new(MIDDAY_2024_03_10 + 24 * HOUR);
        let err = ledger
            .cancel_transaction_at(target.clone(), next_day)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let wrong_group = CancelTarget::ExternalRef {
            group_id: GroupId::new("g2"),
            external_ref: 42,
        };
        let same_day = TimeMs::new(MIDDAY_2024_03_10 + HOUR);
        assert!(ledger.cancel_transaction_at(wrong_group, same_day).await.is_err());

        let cancelled = ledger.cancel_transaction_at(target, same_day).await.unwrap();
        assert_eq!(cancelled.id, tx.id);
    }

    #[tokio::test]
    async fn test_cancel_missing_transaction_is_not_found() {
        let (ledger, _temp) = setup_ledger(Arc::new(MockRateProvider::new())).await;
        let err = ledger.cancel_transaction(CancelTarget::Id(999)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_without_aggregate_row_changes_nothing() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;
        let tx = ledger.record_transaction(payout("g1", "1000", 1)).await.unwrap();

        // Wipe the aggregates behind the ledger's back.
        let mut uow = ledger.repository().begin().await.unwrap();
        uow.delete_aggregates_in_range(date("2024-03-10"), date("2024-03-10"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let err = ledger.cancel_transaction(CancelTarget::Id(tx.id)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(ledger.repository().get_transaction(tx.id).await.unwrap().is_some());
    }
}

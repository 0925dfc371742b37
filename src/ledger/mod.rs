//! The ledger service: records, cancels and rebuilds, keeping the stored
//! aggregates in step with the transaction log.
//!
//! Every mutation runs as one `UnitOfWork` under the day lock(s) of the dates
//! it touches. Write conflicts from the store are retried with backoff a
//! bounded number of times before surfacing as `ConcurrencyConflict`.

mod bulk_delete;
mod cancel;
mod rebuild;
mod record;

pub use bulk_delete::BulkDeleteOutcome;
pub use cancel::CancelTarget;
pub use rebuild::{RebuildReport, MAX_REBUILD_SPAN_DAYS};

use crate::db::{Repository, StoreError, UnitOfWork};
use crate::domain::{
    AggregateSums, BusinessDate, DailySummary, DailyTotals, GroupConfig, GroupDailyAggregate,
    GroupId, TimeMs, Transaction,
};
use crate::engine::{
    BusinessClock, BusinessWindow, CodecError, ConfirmationHandshake, DayLocks, FoldDirection,
    FoldError, InstantOutOfRange, LiveRates,
};
use crate::rates::{live_rates, RateDefaults, RateError, RateProvider};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("write conflict persisted after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },
    #[error("malformed reference: {0}")]
    Format(String),
    #[error("rate provider failed: {0}")]
    RateProvider(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            // The retry loop rewrites the attempt count.
            StoreError::Conflict(_) => LedgerError::ConcurrencyConflict { attempts: 1 },
            StoreError::Db(e) => LedgerError::Db(e),
        }
    }
}

impl From<FoldError> for LedgerError {
    fn from(err: FoldError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl From<InstantOutOfRange> for LedgerError {
    fn from(err: InstantOutOfRange) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl From<CodecError> for LedgerError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Format(msg) => LedgerError::Format(msg),
        }
    }
}

impl From<RateError> for LedgerError {
    fn from(err: RateError) -> Self {
        match err {
            RateError::Invalid(msg) => LedgerError::Validation(msg),
            other => LedgerError::RateProvider(other.to_string()),
        }
    }
}

/// Tunables that come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    pub rate_defaults: RateDefaults,
    pub max_conflict_retries: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            rate_defaults: RateDefaults::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    repo: Arc<Repository>,
    rates: Arc<dyn RateProvider>,
    clock: BusinessClock,
    locks: Arc<DayLocks>,
    handshake: Arc<ConfirmationHandshake>,
    settings: LedgerSettings,
}

impl Ledger {
    pub fn new(
        repo: Arc<Repository>,
        rates: Arc<dyn RateProvider>,
        clock: BusinessClock,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            repo,
            rates,
            clock,
            locks: Arc::new(DayLocks::new()),
            handshake: Arc::new(ConfirmationHandshake::default()),
            settings,
        }
    }

    /// Use a shared handshake, e.g. one with a configured timeout.
    pub fn with_handshake(mut self, handshake: Arc<ConfirmationHandshake>) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn clock(&self) -> &BusinessClock {
        &self.clock
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn handshake(&self) -> &Arc<ConfirmationHandshake> {
        &self.handshake
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Business date that `now` falls in.
    ///
    /// # Errors
    /// Returns `Validation` if the system clock is outside years 0000-9999.
    pub fn today_key(&self) -> Result<BusinessDate, LedgerError> {
        Ok(self.clock.today_key(TimeMs::now())?)
    }

    pub fn window_for(&self, date: BusinessDate) -> BusinessWindow {
        self.clock.window_for(date)
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_group_aggregate(
        &self,
        date: BusinessDate,
        group_id: &GroupId,
    ) -> Result<Option<GroupDailyAggregate>, LedgerError> {
        Ok(self.repo.get_group_aggregate(date, group_id).await?)
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_daily_totals(
        &self,
        date: BusinessDate,
    ) -> Result<Option<DailyTotals>, LedgerError> {
        Ok(self.repo.get_daily_totals(date).await?)
    }

    /// Every day in `[start, end]` that has aggregates, ordered by date then group.
    ///
    /// # Errors
    /// Returns `Validation` if `start > end`.
    pub async fn list_summaries(
        &self,
        start: BusinessDate,
        end: BusinessDate,
    ) -> Result<Vec<DailySummary>, LedgerError> {
        check_range(start, end)?;
        Ok(self.repo.list_summaries(start, end).await?)
    }

    /// A group's transactions in one business day, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_group_transactions(
        &self,
        group_id: &GroupId,
        date: BusinessDate,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let window = self.clock.window_for(date);
        Ok(self.repo.find_by_group_and_window(group_id, window).await?)
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    /// Run `attempt` until it stops reporting a write conflict, at most
    /// `max_conflict_retries + 1` times.
    async fn with_conflict_retry<T, F, Fut>(&self, op: &'static str, attempt: F) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.settings.max_conflict_retries.saturating_add(1);
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(250),
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        retry(policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = attempt();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(LedgerError::ConcurrencyConflict { .. }) if n < max_attempts => {
                        warn!(op, attempt = n, max_attempts, "Write conflict, retrying");
                        Err(backoff::Error::transient(LedgerError::ConcurrencyConflict {
                            attempts: n,
                        }))
                    }
                    Err(LedgerError::ConcurrencyConflict { .. }) => {
                        warn!(op, attempts = n, "Write conflict, giving up");
                        Err(backoff::Error::permanent(LedgerError::ConcurrencyConflict {
                            attempts: n,
                        }))
                    }
                    Err(other) => Err(backoff::Error::permanent(other)),
                }
            }
        })
        .await
    }

    async fn live_rates(&self) -> Result<LiveRates, LedgerError> {
        Ok(live_rates(self.rates.as_ref(), &self.settings.rate_defaults).await?)
    }

    /// Configs of every group with a transaction in `window`, one read per group.
    ///
    /// Runs before a unit of work begins so provider reads never wait on the
    /// connection pool while the write lock is held.
    async fn group_configs_in(
        &self,
        window: BusinessWindow,
    ) -> Result<HashMap<GroupId, GroupConfig>, LedgerError> {
        let mut configs = HashMap::new();
        for tx in self.repo.find_by_window(window).await? {
            if !configs.contains_key(&tx.group_id) {
                let config = self.rates.group_config(&tx.group_id).await?;
                configs.insert(tx.group_id, config);
            }
        }
        Ok(configs)
    }
}

/// Add (or subtract) one transaction's delta to its group row and its day's
/// totals row, then write both back.
///
/// Reverse requires both rows to exist; a missing row means the aggregates
/// already disagree with the ledger, which is surfaced as `NotFound`.
async fn fold_rows(
    uow: &mut UnitOfWork,
    tx: &Transaction,
    direction: FoldDirection,
    delta: &AggregateSums,
) -> Result<(), LedgerError> {
    let date = tx.business_date;
    let group_row = uow.load_group_aggregate(date, &tx.group_id).await?;
    let totals_row = uow.load_daily_totals(date).await?;

    let (mut group_row, mut totals_row) = match direction {
        FoldDirection::Apply => (
            group_row.unwrap_or_else(|| GroupDailyAggregate::empty(date, tx.group_id.clone())),
            totals_row.unwrap_or_else(|| DailyTotals::empty(date)),
        ),
        FoldDirection::Reverse => match (group_row, totals_row) {
            (Some(group_row), Some(totals_row)) => (group_row, totals_row),
            (group_row, _) => {
                let missing = if group_row.is_none() {
                    format!("aggregate row {}/{}", date, tx.group_id)
                } else {
                    format!("daily totals {}", date)
                };
                warn!(
                    tx_id = tx.id,
                    group_id = %tx.group_id,
                    business_date = %date,
                    missing = %missing,
                    "Reverse found no aggregate to subtract from"
                );
                return Err(LedgerError::NotFound(missing));
            }
        },
    };

    if direction == FoldDirection::Apply && tx.group_name.is_some() {
        group_row.group_name = tx.group_name.clone();
    }
    let signed = direction.signed(delta.clone());
    let overflow = |_| FoldError::Overflow {
        id: tx.id,
        kind: tx.kind,
    };
    group_row.fold(&signed).map_err(overflow)?;
    totals_row.fold(&signed).map_err(overflow)?;

    uow.save_group_aggregate(&group_row).await?;
    uow.save_daily_totals(&totals_row).await?;
    Ok(())
}

fn check_range(start: BusinessDate, end: BusinessDate) -> Result<(), LedgerError> {
    if start > end {
        return Err(LedgerError::Validation(format!(
            "start date {} is after end date {}",
            start, end
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::rates::MockRateProvider;

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let (ledger, _temp) = setup_ledger(Arc::new(MockRateProvider::new())).await;
        let calls = AtomicU32::new(0);

        let result: Result<(), LedgerError> = ledger
            .with_conflict_retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LedgerError::ConcurrencyConflict { attempts: 1 }) }
            })
            .await;

        let expected = DEFAULT_MAX_CONFLICT_RETRIES + 1;
        assert!(matches!(
            result,
            Err(LedgerError::ConcurrencyConflict { attempts }) if attempts == expected
        ));
        assert_eq!(calls.load(Ordering::SeqCst), expected);
    }

    #[tokio::test]
    async fn test_retry_recovers_and_passes_other_errors_through() {
        let (ledger, _temp) = setup_ledger(Arc::new(MockRateProvider::new())).await;
        let calls = AtomicU32::new(0);

        let value = ledger
            .with_conflict_retry("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(LedgerError::ConcurrencyConflict { attempts: 1 })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);

        let calls = AtomicU32::new(0);
        let result: Result<(), LedgerError> = ledger
            .with_conflict_retry("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LedgerError::NotFound("gone".to_string())) }
            })
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_list_summaries_rejects_inverted_range() {
        let (ledger, _temp) = setup_ledger(Arc::new(MockRateProvider::new())).await;
        let err = ledger
            .list_summaries(date("2024-03-11"), date("2024-03-10"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_error_conversions() {
        let err: LedgerError = CodecError::Format("1A".to_string()).into();
        assert!(matches!(err, LedgerError::Format(_)));

        let err: LedgerError = RateError::Store("down".to_string()).into();
        assert!(matches!(err, LedgerError::RateProvider(_)));

        let err: LedgerError = StoreError::Conflict("row".to_string()).into();
        assert!(matches!(err, LedgerError::ConcurrencyConflict { .. }));
    }
}

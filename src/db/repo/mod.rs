//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for pooled reads and the
//! `UnitOfWork` for atomic multi-row writes. Methods are organized across
//! submodules by domain:
//! - `transactions.rs` - the append-only ledger store
//! - `aggregates.rs` - per-group and per-day aggregate rows
//! - `rates.rs` - group configs and global rates

mod aggregates;
mod rates;
mod transactions;

use crate::domain::{
    BusinessDate, DailySummary, DailyTotals, Decimal, GroupDailyAggregate, GroupId,
    NewTransaction, Transaction,
};
use crate::engine::BusinessWindow;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;

/// Failure of a guarded write.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row changed underneath us, or the database stayed locked.
    /// Safe to retry from a fresh read.
    #[error("write conflict on {0}")]
    Conflict(String),
    #[error(transparent)]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            StoreError::Conflict(err.to_string())
        } else {
            StoreError::Db(err)
        }
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and their extended codes, plus unique violations
/// from two writers creating the same row.
fn is_contention(err: &sqlx::Error) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    if db_err.is_unique_violation() {
        return true;
    }
    let Some(code) = db_err.code() else {
        return false;
    };
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a write transaction that already holds the database write lock.
    ///
    /// Taking the lock with the first statement means later reads inside the
    /// transaction can never observe a snapshot another writer has moved past.
    ///
    /// # Errors
    /// Returns `StoreError::Conflict` if the lock cannot be taken within the busy timeout.
    pub async fn begin(&self) -> Result<UnitOfWork, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE ledger_meta SET write_seq = write_seq + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        Ok(UnitOfWork { tx })
    }

    // =========================================================================
    // Ledger store
    // =========================================================================

    /// Insert a transaction on its own, without touching aggregates.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, sqlx::Error> {
        let id = transactions::insert(&self.pool, &new).await?;
        Ok(Transaction::from_new(id, new))
    }

    /// Delete one transaction. Returns true if a row existed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_transaction(&self, id: i64) -> Result<bool, sqlx::Error> {
        transactions::delete(&self.pool, id).await
    }

    pub async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>, sqlx::Error> {
        transactions::get(&self.pool, id).await
    }

    /// Transactions of one group inside a window, ordered by `occurred_at` ascending.
    pub async fn find_by_group_and_window(
        &self,
        group_id: &GroupId,
        window: BusinessWindow,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        transactions::find_by_group_and_window(&self.pool, group_id, window).await
    }

    /// Transactions of every group inside a window, ordered by `occurred_at` ascending.
    pub async fn find_by_window(
        &self,
        window: BusinessWindow,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        transactions::find_by_window(&self.pool, window).await
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    pub async fn get_group_aggregate(
        &self,
        date: BusinessDate,
        group_id: &GroupId,
    ) -> Result<Option<GroupDailyAggregate>, sqlx::Error> {
        aggregates::load_group(&self.pool, date, group_id).await
    }

    pub async fn get_daily_totals(
        &self,
        date: BusinessDate,
    ) -> Result<Option<DailyTotals>, sqlx::Error> {
        aggregates::load_totals(&self.pool, date).await
    }

    /// Group rows of one date, ordered by group id.
    pub async fn list_group_aggregates(
        &self,
        date: BusinessDate,
    ) -> Result<Vec<GroupDailyAggregate>, sqlx::Error> {
        aggregates::list_groups(&self.pool, date, date).await
    }

    /// Daily totals with their group rows for every date in `[start, end]` that has rows.
    pub async fn list_summaries(
        &self,
        start: BusinessDate,
        end: BusinessDate,
    ) -> Result<Vec<DailySummary>, sqlx::Error> {
        let totals = aggregates::list_totals(&self.pool, start, end).await?;
        let mut groups = aggregates::list_groups(&self.pool, start, end).await?;

        let mut summaries = Vec::with_capacity(totals.len());
        for day in totals {
            let (mine, rest): (Vec<_>, Vec<_>) = groups
                .into_iter()
                .partition(|g| g.business_date == day.business_date);
            groups = rest;
            summaries.push(DailySummary {
                totals: day,
                groups: mine,
            });
        }
        Ok(summaries)
    }
}

/// One atomic write against the ledger and its aggregates.
///
/// Dropping without `commit` rolls everything back.
pub struct UnitOfWork {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn insert_transaction(
        &mut self,
        new: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let id = transactions::insert(&mut *self.tx, &new).await?;
        Ok(Transaction::from_new(id, new))
    }

    pub async fn get_transaction(&mut self, id: i64) -> Result<Option<Transaction>, StoreError> {
        Ok(transactions::get(&mut *self.tx, id).await?)
    }

    pub async fn delete_transaction(&mut self, id: i64) -> Result<bool, StoreError> {
        Ok(transactions::delete(&mut *self.tx, id).await?)
    }

    pub async fn find_by_external_ref(
        &mut self,
        group_id: &GroupId,
        external_ref: i64,
        window: BusinessWindow,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(transactions::find_by_external_ref(&mut *self.tx, group_id, external_ref, window).await?)
    }

    pub async fn find_by_window(
        &mut self,
        window: BusinessWindow,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(transactions::find_by_window(&mut *self.tx, window).await?)
    }

    /// Delete every transaction of a group inside a window. Returns the count.
    pub async fn delete_group_window(
        &mut self,
        group_id: &GroupId,
        window: BusinessWindow,
    ) -> Result<u64, StoreError> {
        Ok(transactions::delete_group_window(&mut *self.tx, group_id, window).await?)
    }

    pub async fn load_group_aggregate(
        &mut self,
        date: BusinessDate,
        group_id: &GroupId,
    ) -> Result<Option<GroupDailyAggregate>, StoreError> {
        Ok(aggregates::load_group(&mut *self.tx, date, group_id).await?)
    }

    pub async fn load_daily_totals(
        &mut self,
        date: BusinessDate,
    ) -> Result<Option<DailyTotals>, StoreError> {
        Ok(aggregates::load_totals(&mut *self.tx, date).await?)
    }

    /// Write a group row guarded by its version. Returns the row as stored.
    ///
    /// # Errors
    /// Returns `StoreError::Conflict` if the stored version moved.
    pub async fn save_group_aggregate(
        &mut self,
        row: &GroupDailyAggregate,
    ) -> Result<GroupDailyAggregate, StoreError> {
        aggregates::save_group(&mut *self.tx, row).await
    }

    /// Write a totals row guarded by its version. Returns the row as stored.
    ///
    /// # Errors
    /// Returns `StoreError::Conflict` if the stored version moved.
    pub async fn save_daily_totals(&mut self, row: &DailyTotals) -> Result<DailyTotals, StoreError> {
        aggregates::save_totals(&mut *self.tx, row).await
    }

    /// Delete every aggregate row dated in `[start, end]`. Returns rows deleted.
    pub async fn delete_aggregates_in_range(
        &mut self,
        start: BusinessDate,
        end: BusinessDate,
    ) -> Result<u64, StoreError> {
        Ok(aggregates::delete_range(&mut *self.tx, start, end).await?)
    }
}

// =========================================================================
// Column helpers
// =========================================================================

pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn opt_decimal_col(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: col.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

pub(crate) fn date_col(row: &SqliteRow, col: &str) -> Result<BusinessDate, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    BusinessDate::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

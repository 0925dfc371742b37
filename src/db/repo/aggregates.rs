//! Aggregate rows: per `(business_date, group_id)` and per `business_date`.
//!
//! Writes are guarded by the row's `version`. A fresh row (version 0) is
//! inserted and collides on the primary key if someone else created it first;
//! an existing row is updated only while its stored version still matches.

use crate::domain::{
    AggregateSums, BusinessDate, DailyTotals, DerivedFigures, FiguresOutOfRange,
    GroupDailyAggregate, GroupId,
};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Executor, Row};

use super::{date_col, decimal_col, StoreError};

const FIGURE_COLUMNS: [&str; 17] = [
    "incoming_count",
    "incoming_amount",
    "incoming_usdt",
    "actual_incoming_usdt",
    "sell_usdt",
    "sell_profit",
    "outgoing_count",
    "outgoing_usdt",
    "payout_count",
    "payout_amount",
    "payout_fees",
    "payout_usdt",
    "payout_commission",
    "should_issued",
    "pending_usdt",
    "wallet",
    "profit",
];

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_figures<'q>(
    query: SqliteQuery<'q>,
    sums: &AggregateSums,
    derived: &DerivedFigures,
) -> SqliteQuery<'q> {
    query
        .bind(sums.incoming_count)
        .bind(sums.incoming_amount.to_canonical_string())
        .bind(sums.incoming_usdt.to_canonical_string())
        .bind(sums.actual_incoming_usdt.to_canonical_string())
        .bind(sums.sell_usdt.to_canonical_string())
        .bind(sums.sell_profit.to_canonical_string())
        .bind(sums.outgoing_count)
        .bind(sums.outgoing_usdt.to_canonical_string())
        .bind(sums.payout_count)
        .bind(sums.payout_amount.to_canonical_string())
        .bind(sums.payout_fees.to_canonical_string())
        .bind(sums.payout_usdt.to_canonical_string())
        .bind(sums.payout_commission.to_canonical_string())
        .bind(derived.should_issued.to_canonical_string())
        .bind(derived.pending_usdt.to_canonical_string())
        .bind(derived.wallet.to_canonical_string())
        .bind(derived.profit.to_canonical_string())
}

fn row_to_sums(row: &SqliteRow) -> Result<AggregateSums, sqlx::Error> {
    Ok(AggregateSums {
        incoming_count: row.try_get("incoming_count")?,
        incoming_amount: decimal_col(row, "incoming_amount")?,
        incoming_usdt: decimal_col(row, "incoming_usdt")?,
        actual_incoming_usdt: decimal_col(row, "actual_incoming_usdt")?,
        sell_usdt: decimal_col(row, "sell_usdt")?,
        sell_profit: decimal_col(row, "sell_profit")?,
        outgoing_count: row.try_get("outgoing_count")?,
        outgoing_usdt: decimal_col(row, "outgoing_usdt")?,
        payout_count: row.try_get("payout_count")?,
        payout_amount: decimal_col(row, "payout_amount")?,
        payout_fees: decimal_col(row, "payout_fees")?,
        payout_usdt: decimal_col(row, "payout_usdt")?,
        payout_commission: decimal_col(row, "payout_commission")?,
    })
}

// Derived columns are for readers of the raw table; loads recompute them from the sums.
fn row_to_group(row: &SqliteRow) -> Result<GroupDailyAggregate, sqlx::Error> {
    let group_id: String = row.try_get("group_id")?;
    let sums = row_to_sums(row)?;
    Ok(GroupDailyAggregate {
        business_date: date_col(row, "business_date")?,
        group_id: GroupId::new(group_id),
        group_name: row.try_get("group_name")?,
        derived: derived_of(&sums)?,
        sums,
        version: row.try_get("version")?,
    })
}

fn row_to_totals(row: &SqliteRow) -> Result<DailyTotals, sqlx::Error> {
    let sums = row_to_sums(row)?;
    Ok(DailyTotals {
        business_date: date_col(row, "business_date")?,
        derived: derived_of(&sums)?,
        sums,
        version: row.try_get("version")?,
    })
}

fn derived_of(sums: &AggregateSums) -> Result<DerivedFigures, sqlx::Error> {
    sums.derived().ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "should_issued".to_string(),
        source: Box::new(FiguresOutOfRange),
    })
}

fn stale(what: String, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::Conflict(what))
    } else {
        Ok(())
    }
}

pub(super) async fn load_group<'e, E>(
    executor: E,
    date: BusinessDate,
    group_id: &GroupId,
) -> Result<Option<GroupDailyAggregate>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT * FROM group_daily_aggregates WHERE business_date = ? AND group_id = ?",
    )
    .bind(date.as_key())
    .bind(group_id.as_str())
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(row_to_group).transpose()
}

pub(super) async fn load_totals<'e, E>(
    executor: E,
    date: BusinessDate,
) -> Result<Option<DailyTotals>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM daily_totals WHERE business_date = ?")
        .bind(date.as_key())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_totals).transpose()
}

pub(super) async fn list_groups<'e, E>(
    executor: E,
    start: BusinessDate,
    end: BusinessDate,
) -> Result<Vec<GroupDailyAggregate>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT * FROM group_daily_aggregates
        WHERE business_date >= ? AND business_date <= ?
        ORDER BY business_date ASC, group_id ASC
        "#,
    )
    .bind(start.as_key())
    .bind(end.as_key())
    .fetch_all(executor)
    .await?;
    rows.iter().map(row_to_group).collect()
}

pub(super) async fn list_totals<'e, E>(
    executor: E,
    start: BusinessDate,
    end: BusinessDate,
) -> Result<Vec<DailyTotals>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT * FROM daily_totals
        WHERE business_date >= ? AND business_date <= ?
        ORDER BY business_date ASC
        "#,
    )
    .bind(start.as_key())
    .bind(end.as_key())
    .fetch_all(executor)
    .await?;
    rows.iter().map(row_to_totals).collect()
}

pub(super) async fn save_group<'e, E>(
    executor: E,
    row: &GroupDailyAggregate,
) -> Result<GroupDailyAggregate, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = chrono::Utc::now().timestamp_millis();
    let derived = row.derived.clone();

    let affected = if row.version == 0 {
        let sql = format!(
            "INSERT INTO group_daily_aggregates (business_date, group_id, group_name, {}, version, updated_at_ms) \
             VALUES (?, ?, ?, {}, 1, ?)",
            FIGURE_COLUMNS.join(", "),
            placeholders(FIGURE_COLUMNS.len()),
        );
        let query = sqlx::query(&sql)
            .bind(row.business_date.as_key())
            .bind(row.group_id.as_str().to_string())
            .bind(row.group_name.clone());
        bind_figures(query, &row.sums, &derived)
            .bind(now)
            .execute(executor)
            .await?
            .rows_affected()
    } else {
        let sql = format!(
            "UPDATE group_daily_aggregates SET group_name = ?, {}, version = version + 1, updated_at_ms = ? \
             WHERE business_date = ? AND group_id = ? AND version = ?",
            assignments(),
        );
        let query = sqlx::query(&sql).bind(row.group_name.clone());
        bind_figures(query, &row.sums, &derived)
            .bind(now)
            .bind(row.business_date.as_key())
            .bind(row.group_id.as_str().to_string())
            .bind(row.version)
            .execute(executor)
            .await?
            .rows_affected()
    };
    stale(
        format!("group aggregate {}/{}", row.business_date, row.group_id),
        affected,
    )?;

    Ok(GroupDailyAggregate {
        derived,
        version: row.version + 1,
        ..row.clone()
    })
}

pub(super) async fn save_totals<'e, E>(
    executor: E,
    row: &DailyTotals,
) -> Result<DailyTotals, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = chrono::Utc::now().timestamp_millis();
    let derived = row.derived.clone();

    let affected = if row.version == 0 {
        let sql = format!(
            "INSERT INTO daily_totals (business_date, {}, version, updated_at_ms) VALUES (?, {}, 1, ?)",
            FIGURE_COLUMNS.join(", "),
            placeholders(FIGURE_COLUMNS.len()),
        );
        let query = sqlx::query(&sql).bind(row.business_date.as_key());
        bind_figures(query, &row.sums, &derived)
            .bind(now)
            .execute(executor)
            .await?
            .rows_affected()
    } else {
        let sql = format!(
            "UPDATE daily_totals SET {}, version = version + 1, updated_at_ms = ? \
             WHERE business_date = ? AND version = ?",
            assignments(),
        );
        let query = sqlx::query(&sql);
        bind_figures(query, &row.sums, &derived)
            .bind(now)
            .bind(row.business_date.as_key())
            .bind(row.version)
            .execute(executor)
            .await?
            .rows_affected()
    };
    stale(format!("daily totals {}", row.business_date), affected)?;

    Ok(DailyTotals {
        derived,
        version: row.version + 1,
        ..row.clone()
    })
}

/// Delete group and totals rows dated in `[start, end]`. Returns rows deleted.
pub(super) async fn delete_range(
    conn: &mut sqlx::sqlite::SqliteConnection,
    start: BusinessDate,
    end: BusinessDate,
) -> Result<u64, sqlx::Error> {
    let groups = sqlx::query(
        "DELETE FROM group_daily_aggregates WHERE business_date >= ? AND business_date <= ?",
    )
    .bind(start.as_key())
    .bind(end.as_key())
    .execute(&mut *conn)
    .await?;
    let totals =
        sqlx::query("DELETE FROM daily_totals WHERE business_date >= ? AND business_date <= ?")
            .bind(start.as_key())
            .bind(end.as_key())
            .execute(&mut *conn)
            .await?;
    Ok(groups.rows_affected() + totals.rows_affected())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn assignments() -> String {
    FIGURE_COLUMNS
        .iter()
        .map(|col| format!("{} = ?", col))
        .collect::<Vec<_>>()
        .join(", ")
}

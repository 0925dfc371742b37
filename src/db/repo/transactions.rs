//! Ledger store: insert, point delete and window queries. No updates.

use crate::domain::{GroupId, NewTransaction, TimeMs, Transaction, TransactionKind};
use crate::engine::BusinessWindow;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Executor, Row};
use std::str::FromStr;

use super::{date_col, opt_decimal_col};

const SELECT_COLUMNS: &str = r#"
    SELECT id, kind, group_id, group_name, business_date, occurred_at_ms,
           local_amount, usdt_amount, exchange_rate, fee_rate_percent,
           handling_fee, buy_rate, sell_rate, external_ref, operator, note
    FROM transactions
"#;

pub(super) async fn insert<'e, E>(executor: E, new: &NewTransaction) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            kind, group_id, group_name, business_date, occurred_at_ms,
            local_amount, usdt_amount, exchange_rate, fee_rate_percent,
            handling_fee, buy_rate, sell_rate, external_ref, operator, note,
            created_at_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.kind.as_str())
    .bind(new.group_id.as_str())
    .bind(new.group_name.as_deref())
    .bind(new.business_date.as_key())
    .bind(new.occurred_at.as_ms())
    .bind(new.local_amount.map(|d| d.to_canonical_string()))
    .bind(new.usdt_amount.map(|d| d.to_canonical_string()))
    .bind(new.exchange_rate.map(|d| d.to_canonical_string()))
    .bind(new.fee_rate_percent.map(|d| d.to_canonical_string()))
    .bind(new.handling_fee.map(|d| d.to_canonical_string()))
    .bind(new.buy_rate.map(|d| d.to_canonical_string()))
    .bind(new.sell_rate.map(|d| d.to_canonical_string()))
    .bind(new.external_ref)
    .bind(new.operator.as_deref())
    .bind(new.note.as_deref())
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(super) async fn get<'e, E>(executor: E, id: i64) -> Result<Option<Transaction>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(row_to_transaction).transpose()
}

pub(super) async fn delete<'e, E>(executor: E, id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn delete_group_window<'e, E>(
    executor: E,
    group_id: &GroupId,
    window: BusinessWindow,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM transactions
        WHERE group_id = ? AND occurred_at_ms >= ? AND occurred_at_ms <= ?
        "#,
    )
    .bind(group_id.as_str())
    .bind(window.start.as_ms())
    .bind(window.end.as_ms())
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub(super) async fn find_by_window<'e, E>(
    executor: E,
    window: BusinessWindow,
) -> Result<Vec<Transaction>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{} WHERE occurred_at_ms >= ? AND occurred_at_ms <= ? ORDER BY occurred_at_ms ASC, id ASC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(window.start.as_ms())
        .bind(window.end.as_ms())
        .fetch_all(executor)
        .await?;
    rows.iter().map(row_to_transaction).collect()
}

pub(super) async fn find_by_group_and_window<'e, E>(
    executor: E,
    group_id: &GroupId,
    window: BusinessWindow,
) -> Result<Vec<Transaction>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{} WHERE group_id = ? AND occurred_at_ms >= ? AND occurred_at_ms <= ? \
         ORDER BY occurred_at_ms ASC, id ASC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(group_id.as_str())
        .bind(window.start.as_ms())
        .bind(window.end.as_ms())
        .fetch_all(executor)
        .await?;
    rows.iter().map(row_to_transaction).collect()
}

/// Latest transaction of a group carrying `external_ref` inside the window.
pub(super) async fn find_by_external_ref<'e, E>(
    executor: E,
    group_id: &GroupId,
    external_ref: i64,
    window: BusinessWindow,
) -> Result<Option<Transaction>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{} WHERE group_id = ? AND external_ref = ? \
         AND occurred_at_ms >= ? AND occurred_at_ms <= ? \
         ORDER BY id DESC LIMIT 1",
        SELECT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(group_id.as_str())
        .bind(external_ref)
        .bind(window.start.as_ms())
        .bind(window.end.as_ms())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_transaction).transpose()
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    let kind_str: String = row.try_get("kind")?;
    let kind = TransactionKind::from_str(&kind_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "kind".to_string(),
        source: e.into(),
    })?;
    let group_id: String = row.try_get("group_id")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        kind,
        group_id: GroupId::new(group_id),
        group_name: row.try_get("group_name")?,
        business_date: date_col(row, "business_date")?,
        occurred_at: TimeMs::new(row.try_get("occurred_at_ms")?),
        local_amount: opt_decimal_col(row, "local_amount")?,
        usdt_amount: opt_decimal_col(row, "usdt_amount")?,
        exchange_rate: opt_decimal_col(row, "exchange_rate")?,
        fee_rate_percent: opt_decimal_col(row, "fee_rate_percent")?,
        handling_fee: opt_decimal_col(row, "handling_fee")?,
        buy_rate: opt_decimal_col(row, "buy_rate")?,
        sell_rate: opt_decimal_col(row, "sell_rate")?,
        external_ref: row.try_get("external_ref")?,
        operator: row.try_get("operator")?,
        note: row.try_get("note")?,
    })
}

//! Group configs and global rates.

use crate::domain::{Decimal, GlobalRate, GroupConfig, GroupId};
use sqlx::Row;

use super::{decimal_col, Repository};

impl Repository {
    /// Stored config for a group, or `None` if the group was never configured.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_group_config(
        &self,
        group_id: &GroupId,
    ) -> Result<Option<GroupConfig>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT group_id, fee_rate, in_rate, out_rate, handling_fee, is_open
            FROM group_configs
            WHERE group_id = ?
            "#,
        )
        .bind(group_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let id: String = row.try_get("group_id")?;
            Ok(GroupConfig {
                group_id: GroupId::new(id),
                fee_rate: decimal_col(&row, "fee_rate")?,
                in_rate: decimal_col(&row, "in_rate")?,
                out_rate: decimal_col(&row, "out_rate")?,
                handling_fee: decimal_col(&row, "handling_fee")?,
                is_open: row.try_get::<i64, _>("is_open")? != 0,
            })
        })
        .transpose()
    }

    /// Insert or replace a group's config.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_group_config(&self, config: &GroupConfig) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO group_configs (group_id, fee_rate, in_rate, out_rate, handling_fee, is_open, updated_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id) DO UPDATE SET
                fee_rate = excluded.fee_rate,
                in_rate = excluded.in_rate,
                out_rate = excluded.out_rate,
                handling_fee = excluded.handling_fee,
                is_open = excluded.is_open,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(config.group_id.as_str())
        .bind(config.fee_rate.to_canonical_string())
        .bind(config.in_rate.to_canonical_string())
        .bind(config.out_rate.to_canonical_string())
        .bind(config.handling_fee.to_canonical_string())
        .bind(config.is_open as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored value of a global rate, or `None` if it was never set.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_global_rate(&self, rate: GlobalRate) -> Result<Option<Decimal>, sqlx::Error> {
        let row = sqlx::query("SELECT value FROM global_rates WHERE key = ?")
            .bind(rate.key())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decimal_col(&row, "value")).transpose()
    }

    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn set_global_rate(&self, rate: GlobalRate, value: Decimal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO global_rates (key, value, updated_at_ms) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(rate.key())
        .bind(value.to_canonical_string())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

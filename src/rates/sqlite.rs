//! Rate provider backed by the ledger database.

use super::{validate_global_rate, validate_group_config, RateError, RateProvider};
use crate::db::Repository;
use crate::domain::{Decimal, GlobalRate, GroupConfig, GroupId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SqliteRateProvider {
    repo: Arc<Repository>,
}

impl SqliteRateProvider {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Validate and store a group config.
    ///
    /// Existing transactions keep the rates frozen on them; only transactions
    /// recorded afterwards see the new values.
    ///
    /// # Errors
    /// Returns `RateError::Invalid` for negative rates, `RateError::Store` if the write fails.
    pub async fn set_group_config(&self, config: &GroupConfig) -> Result<(), RateError> {
        validate_group_config(config)?;
        self.repo.upsert_group_config(config).await?;
        info!(
            group_id = %config.group_id,
            fee_rate = %config.fee_rate,
            in_rate = %config.in_rate,
            out_rate = %config.out_rate,
            handling_fee = %config.handling_fee,
            "Group config updated"
        );
        Ok(())
    }

    /// # Errors
    /// Returns `RateError::Invalid` if the value is out of range, `RateError::Store` if the write fails.
    pub async fn set_global_rate(&self, rate: GlobalRate, value: Decimal) -> Result<(), RateError> {
        validate_global_rate(rate, value)?;
        self.repo.set_global_rate(rate, value).await?;
        info!(rate = %rate, value = %value, "Global rate updated");
        Ok(())
    }
}

#[async_trait]
impl RateProvider for SqliteRateProvider {
    async fn group_config(&self, group_id: &GroupId) -> Result<GroupConfig, RateError> {
        Ok(self
            .repo
            .get_group_config(group_id)
            .await?
            .unwrap_or_else(|| GroupConfig::unconfigured(group_id.clone())))
    }

    async fn global_rate(&self, rate: GlobalRate) -> Result<Option<Decimal>, RateError> {
        Ok(self.repo.get_global_rate(rate).await?)
    }
}

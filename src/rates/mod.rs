//! Rate/config provider abstraction.
//!
//! Group configs and global rates are owned outside the ledger. The engine
//! only reads them, once per logical operation, and freezes what it read onto
//! the transactions it creates.

use crate::domain::{Decimal, GlobalRate, GroupConfig, GroupId};
use crate::engine::LiveRates;
use async_trait::async_trait;
use std::fmt;

pub mod mock;
pub mod sqlite;

pub use mock::MockRateProvider;
pub use sqlite::SqliteRateProvider;

/// Read side of the configuration service.
#[async_trait]
pub trait RateProvider: Send + Sync + fmt::Debug {
    /// Config for a group. Groups that were never configured get
    /// [`GroupConfig::unconfigured`], not an error.
    async fn group_config(&self, group_id: &GroupId) -> Result<GroupConfig, RateError>;

    /// Current value of a global rate, or `None` if it was never set.
    async fn global_rate(&self, rate: GlobalRate) -> Result<Option<Decimal>, RateError>;
}

/// Values used for global rates that have never been set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDefaults {
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
}

impl Default for RateDefaults {
    fn default() -> Self {
        Self {
            buy_rate: Decimal::from(16300),
            sell_rate: Decimal::zero(),
        }
    }
}

impl RateDefaults {
    pub fn for_rate(&self, rate: GlobalRate) -> Decimal {
        match rate {
            GlobalRate::BuyRate => self.buy_rate,
            GlobalRate::SellRate => self.sell_rate,
        }
    }
}

/// Read both global rates, filling in defaults.
///
/// # Errors
/// Returns the provider's error if either read fails.
pub async fn live_rates(
    provider: &dyn RateProvider,
    defaults: &RateDefaults,
) -> Result<LiveRates, RateError> {
    let buy_rate = provider
        .global_rate(GlobalRate::BuyRate)
        .await?
        .unwrap_or(defaults.buy_rate);
    let sell_rate = provider
        .global_rate(GlobalRate::SellRate)
        .await?
        .unwrap_or(defaults.sell_rate);
    Ok(LiveRates {
        buy_rate,
        sell_rate,
    })
}

/// Error type for rate provider operations.
#[derive(Debug, Clone)]
pub enum RateError {
    /// A value was rejected before being stored.
    Invalid(String),
    /// The backing store failed.
    Store(String),
    /// Other error
    Other(String),
}

impl fmt::Display for RateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateError::Invalid(msg) => write!(f, "Invalid rate: {}", msg),
            RateError::Store(msg) => write!(f, "Rate store error: {}", msg),
            RateError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for RateError {}

impl From<sqlx::Error> for RateError {
    fn from(err: sqlx::Error) -> Self {
        RateError::Store(err.to_string())
    }
}

/// Check a global rate before it is stored: `buyRate` must be positive,
/// `sellRate` may be zero (selling disabled) but not negative.
pub fn validate_global_rate(rate: GlobalRate, value: Decimal) -> Result<(), RateError> {
    match rate {
        GlobalRate::BuyRate if !value.is_positive() => Err(RateError::Invalid(format!(
            "{} must be greater than 0, got {}",
            rate, value
        ))),
        GlobalRate::SellRate if value.is_negative() => Err(RateError::Invalid(format!(
            "{} must not be negative, got {}",
            rate, value
        ))),
        _ => Ok(()),
    }
}

/// Check a group config before it is stored. All rates are non-negative.
pub fn validate_group_config(config: &GroupConfig) -> Result<(), RateError> {
    if config.group_id.as_str().trim().is_empty() {
        return Err(RateError::Invalid("group id must not be empty".to_string()));
    }
    for (name, value) in [
        ("feeRate", config.fee_rate),
        ("inRate", config.in_rate),
        ("outRate", config.out_rate),
        ("handlingFee", config.handling_fee),
    ] {
        if value.is_negative() {
            return Err(RateError::Invalid(format!(
                "{} must not be negative, got {}",
                name, value
            )));
        }
    }
    if config.fee_rate > Decimal::hundred() {
        return Err(RateError::Invalid(format!(
            "feeRate is a percentage, got {}",
            config.fee_rate
        )));
    }
    Ok(())
}

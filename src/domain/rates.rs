//! Externally owned rate settings consumed by the aggregation engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Decimal, GroupId};

/// Per-group settings. Unconfigured groups get all-zero rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_id: GroupId,
    /// Percentage withheld from inbound settlement, e.g. `2` for 2%.
    pub fee_rate: Decimal,
    /// Local-currency units per settlement unit for inbound deposits.
    pub in_rate: Decimal,
    /// Local-currency units per settlement unit for proxy payouts.
    pub out_rate: Decimal,
    /// Flat settlement-currency fee charged per proxy payout.
    pub handling_fee: Decimal,
    pub is_open: bool,
}

impl GroupConfig {
    pub fn unconfigured(group_id: GroupId) -> Self {
        Self {
            group_id,
            fee_rate: Decimal::zero(),
            in_rate: Decimal::zero(),
            out_rate: Decimal::zero(),
            handling_fee: Decimal::zero(),
            is_open: false,
        }
    }
}

/// Globally scoped rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalRate {
    #[serde(rename = "buyRate")]
    BuyRate,
    #[serde(rename = "sellRate")]
    SellRate,
}

impl GlobalRate {
    pub fn key(&self) -> &'static str {
        match self {
            GlobalRate::BuyRate => "buyRate",
            GlobalRate::SellRate => "sellRate",
        }
    }
}

impl fmt::Display for GlobalRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for GlobalRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyRate" => Ok(GlobalRate::BuyRate),
            "sellRate" => Ok(GlobalRate::SellRate),
            other => Err(format!("unknown global rate: {}", other)),
        }
    }
}

//! Per-day aggregate rows and their derived figures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BusinessDate, Decimal, GroupId};

/// A sum or derived figure left the range `Decimal` can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("aggregate figures out of range")]
pub struct FiguresOutOfRange;

/// Running sums kept on every aggregate row.
///
/// The same shape serves as a per-transaction delta, a per-group row and the
/// all-groups daily total.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateSums {
    pub incoming_count: i64,
    pub incoming_amount: Decimal,
    pub incoming_usdt: Decimal,
    pub actual_incoming_usdt: Decimal,
    pub sell_usdt: Decimal,
    pub sell_profit: Decimal,
    pub outgoing_count: i64,
    pub outgoing_usdt: Decimal,
    pub payout_count: i64,
    pub payout_amount: Decimal,
    pub payout_fees: Decimal,
    pub payout_usdt: Decimal,
    pub payout_commission: Decimal,
}

impl AggregateSums {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Elementwise `self + other`, or `None` if any field overflows.
    pub fn checked_add(&self, other: &AggregateSums) -> Option<AggregateSums> {
        Some(AggregateSums {
            incoming_count: self.incoming_count.checked_add(other.incoming_count)?,
            incoming_amount: self.incoming_amount.checked_add(other.incoming_amount)?,
            incoming_usdt: self.incoming_usdt.checked_add(other.incoming_usdt)?,
            actual_incoming_usdt: self
                .actual_incoming_usdt
                .checked_add(other.actual_incoming_usdt)?,
            sell_usdt: self.sell_usdt.checked_add(other.sell_usdt)?,
            sell_profit: self.sell_profit.checked_add(other.sell_profit)?,
            outgoing_count: self.outgoing_count.checked_add(other.outgoing_count)?,
            outgoing_usdt: self.outgoing_usdt.checked_add(other.outgoing_usdt)?,
            payout_count: self.payout_count.checked_add(other.payout_count)?,
            payout_amount: self.payout_amount.checked_add(other.payout_amount)?,
            payout_fees: self.payout_fees.checked_add(other.payout_fees)?,
            payout_usdt: self.payout_usdt.checked_add(other.payout_usdt)?,
            payout_commission: self.payout_commission.checked_add(other.payout_commission)?,
        })
    }

    /// Elementwise negation, used to turn an apply delta into a reverse delta.
    pub fn negated(&self) -> AggregateSums {
        AggregateSums {
            incoming_count: -self.incoming_count,
            incoming_amount: -self.incoming_amount,
            incoming_usdt: -self.incoming_usdt,
            actual_incoming_usdt: -self.actual_incoming_usdt,
            sell_usdt: -self.sell_usdt,
            sell_profit: -self.sell_profit,
            outgoing_count: -self.outgoing_count,
            outgoing_usdt: -self.outgoing_usdt,
            payout_count: -self.payout_count,
            payout_amount: -self.payout_amount,
            payout_fees: -self.payout_fees,
            payout_usdt: -self.payout_usdt,
            payout_commission: -self.payout_commission,
        }
    }

    /// Figures that are always a function of the sums. `None` if one of
    /// them does not fit in a `Decimal`.
    pub fn derived(&self) -> Option<DerivedFigures> {
        let should_issued = self.actual_incoming_usdt.checked_sub(self.payout_usdt)?;
        Some(DerivedFigures {
            should_issued,
            pending_usdt: should_issued.checked_sub(self.outgoing_usdt)?,
            wallet: self
                .incoming_usdt
                .checked_sub(self.outgoing_usdt)?
                .checked_sub(self.payout_usdt)?
                .checked_add(self.payout_commission)?
                .checked_add(self.payout_fees)?,
            profit: self
                .incoming_usdt
                .checked_sub(self.actual_incoming_usdt)?
                .checked_add(self.payout_fees)?
                .checked_add(self.payout_commission)?,
        })
    }

    /// The sums after folding in `delta`, with their derived figures.
    ///
    /// # Errors
    /// Returns `FiguresOutOfRange` and leaves nothing changed on overflow.
    pub fn folded(
        &self,
        delta: &AggregateSums,
    ) -> Result<(AggregateSums, DerivedFigures), FiguresOutOfRange> {
        let sums = self.checked_add(delta).ok_or(FiguresOutOfRange)?;
        let derived = sums.derived().ok_or(FiguresOutOfRange)?;
        Ok((sums, derived))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DerivedFigures {
    /// Net settlement owed to the group: fee-adjusted inbound minus payouts.
    pub should_issued: Decimal,
    /// What is still owed after dispatches.
    pub pending_usdt: Decimal,
    pub wallet: Decimal,
    pub profit: Decimal,
}

/// Aggregate row keyed by `(business_date, group_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDailyAggregate {
    pub business_date: BusinessDate,
    pub group_id: GroupId,
    pub group_name: Option<String>,
    pub sums: AggregateSums,
    pub derived: DerivedFigures,
    /// Optimistic-concurrency version; bumped on every write.
    pub version: i64,
}

impl GroupDailyAggregate {
    /// Zero-initialized row, not yet persisted.
    pub fn empty(business_date: BusinessDate, group_id: GroupId) -> Self {
        Self {
            business_date,
            group_id,
            group_name: None,
            sums: AggregateSums::zero(),
            derived: DerivedFigures::default(),
            version: 0,
        }
    }

    /// # Errors
    /// Returns `FiguresOutOfRange` and leaves the row unchanged on overflow.
    pub fn fold(&mut self, delta: &AggregateSums) -> Result<(), FiguresOutOfRange> {
        let (sums, derived) = self.sums.folded(delta)?;
        self.sums = sums;
        self.derived = derived;
        Ok(())
    }
}

/// All-groups aggregate row keyed by `business_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotals {
    pub business_date: BusinessDate,
    pub sums: AggregateSums,
    pub derived: DerivedFigures,
    pub version: i64,
}

impl DailyTotals {
    pub fn empty(business_date: BusinessDate) -> Self {
        Self {
            business_date,
            sums: AggregateSums::zero(),
            derived: DerivedFigures::default(),
            version: 0,
        }
    }

    /// # Errors
    /// Returns `FiguresOutOfRange` and leaves the row unchanged on overflow.
    pub fn fold(&mut self, delta: &AggregateSums) -> Result<(), FiguresOutOfRange> {
        let (sums, derived) = self.sums.folded(delta)?;
        self.sums = sums;
        self.derived = derived;
        Ok(())
    }
}

/// One business day's totals together with its group rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub totals: DailyTotals,
    pub groups: Vec<GroupDailyAggregate>,
}

//! Per-transaction deltas and day-level folding.
//!
//! `transaction_delta` is the single place the per-kind formulas live. Apply
//! adds the delta, reverse adds its negation, and rebuild folds the deltas of
//! every surviving transaction from zero, so all three paths agree.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{
    AggregateSums, BusinessDate, DailySummary, DailyTotals, Decimal, GroupConfig,
    GroupDailyAggregate, GroupId, Transaction, TransactionKind,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("{kind} transaction {id} has no {field}")]
    MissingField {
        id: i64,
        kind: TransactionKind,
        field: &'static str,
    },
    #[error("{rate} must be positive to fold {kind} transaction {id}")]
    MissingRate {
        id: i64,
        kind: TransactionKind,
        rate: &'static str,
    },
    #[error("figures of {kind} transaction {id} are out of range")]
    Overflow { id: i64, kind: TransactionKind },
}

/// Global rates read once per logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRates {
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
}

/// Every rate a fold needs, resolved for one transaction.
///
/// Values frozen on the transaction win. Live values only fill in for rows
/// written before those columns existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldRates {
    pub fee_rate_percent: Decimal,
    pub handling_fee: Decimal,
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
}

impl FoldRates {
    pub fn resolve(tx: &Transaction, group: &GroupConfig, live: &LiveRates) -> Self {
        Self {
            fee_rate_percent: tx.fee_rate_percent.unwrap_or(group.fee_rate),
            handling_fee: tx.handling_fee.unwrap_or(group.handling_fee),
            buy_rate: tx.buy_rate.unwrap_or(live.buy_rate),
            sell_rate: tx.sell_rate.unwrap_or(live.sell_rate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldDirection {
    Apply,
    Reverse,
}

impl FoldDirection {
    pub fn signed(&self, delta: AggregateSums) -> AggregateSums {
        match self {
            FoldDirection::Apply => delta,
            FoldDirection::Reverse => delta.negated(),
        }
    }
}

/// Contribution of one transaction to its aggregate rows.
///
/// # Errors
/// Returns `FoldError` when an amount the kind requires is absent, a rate it
/// divides by is not positive, or a figure does not fit in a `Decimal`.
pub fn transaction_delta(tx: &Transaction, rates: &FoldRates) -> Result<AggregateSums, FoldError> {
    let missing = |field| FoldError::MissingField {
        id: tx.id,
        kind: tx.kind,
        field,
    };
    let bad_rate = |rate| FoldError::MissingRate {
        id: tx.id,
        kind: tx.kind,
        rate,
    };
    let overflow = || FoldError::Overflow {
        id: tx.id,
        kind: tx.kind,
    };

    match tx.kind {
        TransactionKind::Inbound => {
            let local = tx.local_amount.ok_or_else(|| missing("local amount"))?;
            let exchange_rate = tx
                .exchange_rate
                .filter(Decimal::is_positive)
                .ok_or_else(|| bad_rate("exchange rate"))?;

            let incoming_usdt = local
                .checked_div(exchange_rate)
                .ok_or_else(overflow)?
                .round_derived();
            let keep = rates
                .fee_rate_percent
                .checked_div(Decimal::hundred())
                .and_then(|fee| Decimal::one().checked_sub(fee))
                .ok_or_else(overflow)?;
            let actual_incoming_usdt = incoming_usdt
                .checked_mul(keep)
                .ok_or_else(overflow)?
                .round_derived();
            let (sell_usdt, sell_profit) = if rates.sell_rate.is_positive() {
                let sell_usdt = local
                    .checked_div(rates.sell_rate)
                    .ok_or_else(overflow)?
                    .round_derived();
                let sell_profit = sell_usdt.checked_sub(incoming_usdt).ok_or_else(overflow)?;
                (sell_usdt, sell_profit)
            } else {
                (Decimal::zero(), Decimal::zero())
            };

            Ok(AggregateSums {
                incoming_count: 1,
                incoming_amount: local,
                incoming_usdt,
                actual_incoming_usdt,
                sell_usdt,
                sell_profit,
                ..AggregateSums::zero()
            })
        }
        TransactionKind::Dispatch => {
            let usdt = tx.usdt_amount.ok_or_else(|| missing("usdt amount"))?;
            Ok(AggregateSums {
                outgoing_count: 1,
                outgoing_usdt: usdt,
                ..AggregateSums::zero()
            })
        }
        TransactionKind::ProxyPayout => {
            let local = tx.local_amount.ok_or_else(|| missing("local amount"))?;
            let payout_usdt = tx.usdt_amount.ok_or_else(|| missing("usdt amount"))?;
            if !rates.buy_rate.is_positive() {
                return Err(bad_rate("buy rate"));
            }

            let payout_commission = proxy_payout_usdt(local, rates.buy_rate, rates.handling_fee)
                .and_then(|cost_usdt| payout_usdt.checked_sub(cost_usdt))
                .ok_or_else(overflow)?;
            Ok(AggregateSums {
                payout_count: 1,
                payout_amount: local,
                payout_fees: rates.handling_fee,
                payout_usdt,
                payout_commission,
                ..AggregateSums::zero()
            })
        }
    }
}

/// `local / rate + handling_fee`: the settlement amount of a proxy payout at
/// `out_rate`, or its cost at `buy_rate`. `None` on overflow or a zero rate.
pub fn proxy_payout_usdt(
    local: Decimal,
    rate: Decimal,
    handling_fee: Decimal,
) -> Option<Decimal> {
    local
        .checked_div(rate)?
        .round_derived()
        .checked_add(handling_fee)
}

/// Fresh aggregates for one business day, built from zero.
#[derive(Debug, Clone)]
pub struct DayFold {
    groups: BTreeMap<GroupId, GroupDailyAggregate>,
    totals: DailyTotals,
    folded: usize,
}

impl DayFold {
    pub fn new(business_date: BusinessDate) -> Self {
        Self {
            groups: BTreeMap::new(),
            totals: DailyTotals::empty(business_date),
            folded: 0,
        }
    }

    /// # Errors
    /// Returns `FoldError::Overflow` when the day's sums leave `Decimal` range.
    pub fn push(&mut self, tx: &Transaction, delta: &AggregateSums) -> Result<(), FoldError> {
        let overflow = |_| FoldError::Overflow {
            id: tx.id,
            kind: tx.kind,
        };
        let date = self.totals.business_date;
        let row = self
            .groups
            .entry(tx.group_id.clone())
            .or_insert_with(|| GroupDailyAggregate::empty(date, tx.group_id.clone()));
        if tx.group_name.is_some() {
            row.group_name = tx.group_name.clone();
        }
        row.fold(delta).map_err(overflow)?;
        self.totals.fold(delta).map_err(overflow)?;
        self.folded += 1;
        Ok(())
    }

    pub fn folded(&self) -> usize {
        self.folded
    }

    /// `None` when nothing was folded; empty days get no rows.
    pub fn finish(self) -> Option<DailySummary> {
        if self.folded == 0 {
            return None;
        }
        Some(DailySummary {
            totals: self.totals,
            groups: self.groups.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeMs;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn tx(kind: TransactionKind) -> Transaction {
        Transaction {
            id: 1,
            kind,
            group_id: GroupId::new("g1"),
            group_name: None,
            business_date: "2024-03-10".parse().unwrap(),
            occurred_at: TimeMs::new(0),
            local_amount: None,
            usdt_amount: None,
            exchange_rate: None,
            fee_rate_percent: None,
            handling_fee: None,
            buy_rate: None,
            sell_rate: None,
            external_ref: None,
            operator: None,
            note: None,
        }
    }

    fn rates(fee: &str, handling: &str, buy: &str, sell: &str) -> FoldRates {
        FoldRates {
            fee_rate_percent: d(fee),
            handling_fee: d(handling),
            buy_rate: d(buy),
            sell_rate: d(sell),
        }
    }

    #[test]
    fn test_inbound_delta() {
        let mut inbound = tx(TransactionKind::Inbound);
        inbound.local_amount = Some(d("1000000"));
        inbound.exchange_rate = Some(d("62.5"));

        let delta = transaction_delta(&inbound, &rates("2", "0", "16300", "0")).unwrap();
        assert_eq!(delta.incoming_count, 1);
        assert_eq!(delta.incoming_amount, d("1000000"));
        assert_eq!(delta.incoming_usdt, d("16000"));
        assert_eq!(delta.actual_incoming_usdt, d("15680"));
        assert!(delta.sell_usdt.is_zero());
        assert!(delta.sell_profit.is_zero());
    }

    #[test]
    fn test_inbound_sell_profit_when_sell_rate_set() {
        let mut inbound = tx(TransactionKind::Inbound);
        inbound.local_amount = Some(d("1000000"));
        inbound.exchange_rate = Some(d("62.5"));

        let delta = transaction_delta(&inbound, &rates("0", "0", "16300", "50")).unwrap();
        assert_eq!(delta.sell_usdt, d("20000"));
        assert_eq!(delta.sell_profit, d("4000"));
    }

    #[test]
    fn test_inbound_without_rate_is_rejected() {
        let mut inbound = tx(TransactionKind::Inbound);
        inbound.local_amount = Some(d("100"));
        inbound.exchange_rate = Some(Decimal::zero());

        let err = transaction_delta(&inbound, &rates("0", "0", "1", "0")).unwrap_err();
        assert!(matches!(err, FoldError::MissingRate { rate: "exchange rate", .. }));
    }

    #[test]
    fn test_negative_dispatch_contributes_directly() {
        let mut dispatch = tx(TransactionKind::Dispatch);
        dispatch.usdt_amount = Some(d("-100"));

        let delta = transaction_delta(&dispatch, &rates("0", "0", "16300", "0")).unwrap();
        assert_eq!(delta.outgoing_count, 1);
        assert_eq!(delta.outgoing_usdt, d("-100"));
    }

    #[test]
    fn test_proxy_payout_commission() {
        let mut payout = tx(TransactionKind::ProxyPayout);
        payout.local_amount = Some(d("1000000"));
        payout.usdt_amount = Some(d("16020.5"));

        let delta = transaction_delta(&payout, &rates("0", "5", "16300", "0")).unwrap();
        let cost = (d("1000000") / d("16300")).round_derived() + d("5");
        assert_eq!(delta.payout_commission, d("16020.5") - cost);
        assert_eq!(delta.payout_fees, d("5"));
        // 1000000 / 16300 + 5 = 66.3496932515...
        assert!((cost - d("66.35")).abs() < d("0.001"));
        assert!((delta.payout_commission - d("15954.15")).abs() < d("0.001"));
    }

    #[test]
    fn test_proxy_payout_needs_buy_rate() {
        let mut payout = tx(TransactionKind::ProxyPayout);
        payout.local_amount = Some(d("100"));
        payout.usdt_amount = Some(d("1"));

        let err = transaction_delta(&payout, &rates("0", "0", "0", "0")).unwrap_err();
        assert!(matches!(err, FoldError::MissingRate { rate: "buy rate", .. }));
    }

    #[test]
    fn test_out_of_range_figures_are_rejected() {
        let mut inbound = tx(TransactionKind::Inbound);
        inbound.local_amount = Some(d("10000000000000000000000000"));
        inbound.exchange_rate = Some(d("0.0001"));

        let err = transaction_delta(&inbound, &rates("0", "0", "1", "0")).unwrap_err();
        assert_eq!(
            err,
            FoldError::Overflow {
                id: 1,
                kind: TransactionKind::Inbound
            }
        );

        assert!(proxy_payout_usdt(d("10000000000000000000000000"), d("0.0001"), d("5")).is_none());
        assert!(proxy_payout_usdt(d("100"), Decimal::zero(), d("5")).is_none());
    }

    #[test]
    fn test_day_fold_reports_overflowing_sums() {
        let date: BusinessDate = "2024-03-10".parse().unwrap();
        let mut inbound = tx(TransactionKind::Inbound);
        inbound.local_amount = Some(d("50000000000000000000000000000"));
        inbound.exchange_rate = Some(d("62.5"));
        let delta = transaction_delta(&inbound, &rates("0", "0", "1", "0")).unwrap();

        let mut fold = DayFold::new(date);
        fold.push(&inbound, &delta).unwrap();
        let err = fold.push(&inbound, &delta).unwrap_err();
        assert!(matches!(err, FoldError::Overflow { id: 1, .. }));
        assert_eq!(fold.folded(), 1);
    }

    #[test]
    fn test_frozen_rates_win_over_live() {
        let mut payout = tx(TransactionKind::ProxyPayout);
        payout.buy_rate = Some(d("16000"));
        payout.handling_fee = Some(d("3"));
        let mut group = GroupConfig::unconfigured(GroupId::new("g1"));
        group.handling_fee = d("9");
        group.fee_rate = d("4");
        let live = LiveRates {
            buy_rate: d("17000"),
            sell_rate: d("1"),
        };

        let resolved = FoldRates::resolve(&payout, &group, &live);
        assert_eq!(resolved.buy_rate, d("16000"));
        assert_eq!(resolved.handling_fee, d("3"));
        assert_eq!(resolved.fee_rate_percent, d("4"));
        assert_eq!(resolved.sell_rate, d("1"));
    }

    #[test]
    fn test_day_fold_partitions_groups_and_skips_empty_days() {
        let date: BusinessDate = "2024-03-10".parse().unwrap();
        assert!(DayFold::new(date).finish().is_none());

        let mut fold = DayFold::new(date);
        let mut a = tx(TransactionKind::Dispatch);
        a.usdt_amount = Some(d("10"));
        let mut b = a.clone();
        b.group_id = GroupId::new("g2");
        b.group_name = Some("Desk Two".to_string());

        let r = rates("0", "0", "1", "0");
        for t in [&a, &b, &a] {
            fold.push(t, &transaction_delta(t, &r).unwrap()).unwrap();
        }
        assert_eq!(fold.folded(), 3);

        let summary = fold.finish().unwrap();
        assert_eq!(summary.groups.len(), 2);
        assert_eq!(summary.groups[0].sums.outgoing_usdt, d("20"));
        assert_eq!(summary.groups[1].group_name.as_deref(), Some("Desk Two"));
        assert_eq!(summary.totals.sums.outgoing_count, 3);
        assert_eq!(summary.totals.derived.pending_usdt, d("-30"));
    }
}

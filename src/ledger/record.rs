//! Recording: validate, freeze rates, insert and apply in one unit of work.

use super::{Ledger, LedgerError};
use crate::domain::{
    BusinessDate, Decimal, GroupConfig, NewTransaction, RecordAmount, RecordRequest, TimeMs,
    Transaction,
};
use crate::engine::{proxy_payout_usdt, transaction_delta, FoldDirection, FoldRates, LiveRates};
use tracing::info;

impl Ledger {
    /// Record a transaction and fold it into its day's aggregates.
    ///
    /// The business date comes from `occurred_at` (now, if absent) through the
    /// business-day clock. Every rate the fold needs is frozen onto the stored
    /// row, so later rate changes never alter what this transaction contributes.
    ///
    /// # Errors
    /// - `Validation` for a bad amount, an empty group id, a missing rate, an
    ///   `occurred_at` with no business date, or figures beyond `Decimal` range.
    /// - `RateProvider` if configs cannot be read; nothing is written.
    /// - `ConcurrencyConflict` if the write kept conflicting.
    pub async fn record_transaction(
        &self,
        request: RecordRequest,
    ) -> Result<Transaction, LedgerError> {
        validate_request(&request)?;
        let occurred_at = request.occurred_at.unwrap_or_else(TimeMs::now);
        let business_date = self.clock.today_key(occurred_at)?;

        let group = self.rates.group_config(&request.group_id).await?;
        let live = self.live_rates().await?;
        let new = freeze(request, &group, &live, business_date, occurred_at)?;

        // Reject anything the fold cannot handle before touching the store.
        let provisional = Transaction::from_new(0, new.clone());
        let delta = transaction_delta(&provisional, &FoldRates::resolve(&provisional, &group, &live))?;

        let _day = self.locks.lock_day(business_date).await;
        let stored = self
            .with_conflict_retry("record", || async {
                let mut uow = self.repo.begin().await?;
                let stored = uow.insert_transaction(new.clone()).await?;
                super::fold_rows(&mut uow, &stored, FoldDirection::Apply, &delta).await?;
                uow.commit().await?;
                Ok(stored)
            })
            .await?;

        info!(
            tx_id = stored.id,
            kind = %stored.kind,
            group_id = %stored.group_id,
            business_date = %stored.business_date,
            "Transaction recorded"
        );
        Ok(stored)
    }
}

fn validate_request(request: &RecordRequest) -> Result<(), LedgerError> {
    if request.group_id.as_str().trim().is_empty() {
        return Err(LedgerError::Validation("group id must not be empty".to_string()));
    }
    match request.amount {
        RecordAmount::Inbound { local_amount } | RecordAmount::ProxyPayout { local_amount } => {
            if !local_amount.is_positive() {
                return Err(LedgerError::Validation(format!(
                    "{} amount must be greater than 0, got {}",
                    request.amount.kind(),
                    local_amount
                )));
            }
        }
        RecordAmount::Dispatch { usdt_amount } => {
            if usdt_amount.is_zero() {
                return Err(LedgerError::Validation(
                    "dispatch amount must not be 0".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Resolve every rate the fold needs and build the row to store.
fn freeze(
    request: RecordRequest,
    group: &GroupConfig,
    live: &LiveRates,
    business_date: BusinessDate,
    occurred_at: TimeMs,
) -> Result<NewTransaction, LedgerError> {
    let mut new = NewTransaction {
        kind: request.amount.kind(),
        group_id: request.group_id,
        group_name: request.group_name,
        business_date,
        occurred_at,
        local_amount: None,
        usdt_amount: None,
        exchange_rate: None,
        fee_rate_percent: None,
        handling_fee: None,
        buy_rate: Some(live.buy_rate),
        sell_rate: Some(live.sell_rate),
        external_ref: request.external_ref,
        operator: request.operator,
        note: request.note,
    };

    match request.amount {
        RecordAmount::Inbound { local_amount } => {
            let in_rate = positive(group.in_rate, || {
                format!("exchange rate not set for group {}", new.group_id)
            })?;
            let usdt_amount = local_amount
                .checked_div(in_rate)
                .ok_or_else(|| out_of_range(local_amount, in_rate))?;
            new.local_amount = Some(local_amount);
            new.usdt_amount = Some(usdt_amount.round_derived());
            new.exchange_rate = Some(in_rate);
            new.fee_rate_percent = Some(group.fee_rate);
        }
        RecordAmount::Dispatch { usdt_amount } => {
            new.usdt_amount = Some(usdt_amount);
        }
        RecordAmount::ProxyPayout { local_amount } => {
            let out_rate = positive(group.out_rate, || {
                format!("payout rate not set for group {}", new.group_id)
            })?;
            positive(live.buy_rate, || "buyRate must be greater than 0".to_string())?;
            let usdt_amount = proxy_payout_usdt(local_amount, out_rate, group.handling_fee)
                .ok_or_else(|| out_of_range(local_amount, out_rate))?;
            new.local_amount = Some(local_amount);
            new.usdt_amount = Some(usdt_amount);
            new.exchange_rate = Some(out_rate);
            new.handling_fee = Some(group.handling_fee);
        }
    }
    Ok(new)
}

fn out_of_range(local_amount: Decimal, rate: Decimal) -> LedgerError {
    LedgerError::Validation(format!(
        "amount {} at rate {} is out of range",
        local_amount, rate
    ))
}

fn positive(value: Decimal, message: impl FnOnce() -> String) -> Result<Decimal, LedgerError> {
    if value.is_positive() {
        Ok(value)
    } else {
        Err(LedgerError::Validation(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::domain::{GlobalRate, GroupId, RecordAmount, RecordRequest, TimeMs, TransactionKind};
    use crate::ledger::LedgerError;
    use crate::rates::MockRateProvider;
    use std::sync::Arc;

    fn inbound(group: &str, local: &str) -> RecordRequest {
        RecordRequest::new(
            GroupId::new(group),
            RecordAmount::Inbound {
                local_amount: d(local),
            },
        )
        .at(TimeMs::new(MIDDAY_2024_03_10))
    }

    #[tokio::test]
    async fn test_inbound_scenario_freezes_rates_and_applies() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;

        let tx = ledger
            .record_transaction(inbound("g1", "1000000").with_group_name("Desk One"))
            .await
            .unwrap();
        assert_eq!(tx.kind, TransactionKind::Inbound);
        assert_eq!(tx.business_date, date("2024-03-10"));
        assert_eq!(tx.exchange_rate, Some(d("62.5")));
        assert_eq!(tx.fee_rate_percent, Some(d("2")));
        assert_eq!(tx.buy_rate, Some(d("16300")));
        assert_eq!(tx.usdt_amount, Some(d("16000")));

        let row = ledger
            .get_group_aggregate(date("2024-03-10"), &GroupId::new("g1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.sums.incoming_count, 1);
        assert_eq!(row.sums.incoming_usdt, d("16000"));
        assert_eq!(row.sums.actual_incoming_usdt, d("15680"));
        assert_eq!(row.derived.should_issued, d("15680"));
        assert_eq!(row.derived.profit, d("320"));
        assert_eq!(row.group_name.as_deref(), Some("Desk One"));

        let totals = ledger.get_daily_totals(date("2024-03-10")).await.unwrap().unwrap();
        assert_eq!(totals.sums, row.sums);
    }

    #[tokio::test]
    async fn test_proxy_payout_resolves_usdt_at_creation() {
        let provider = Arc::new(
            MockRateProvider::new()
                .with_group(group_config("g1"))
                .with_global_rate(GlobalRate::BuyRate, d("16300")),
        );
        let (ledger, _temp) = setup_ledger(provider).await;

        let tx = ledger
            .record_transaction(
                RecordRequest::new(
                    GroupId::new("g1"),
                    RecordAmount::ProxyPayout {
                        local_amount: d("1000000"),
                    },
                )
                .at(TimeMs::new(MIDDAY_2024_03_10)),
            )
            .await
            .unwrap();

        // 1000000 / 62.4 + 5
        let expected = (d("1000000") / d("62.4")).round_derived() + d("5");
        assert_eq!(tx.usdt_amount, Some(expected));
        assert_eq!(tx.handling_fee, Some(d("5")));

        let row = ledger
            .get_group_aggregate(date("2024-03-10"), &GroupId::new("g1"))
            .await
            .unwrap()
            .unwrap();
        let cost = (d("1000000") / d("16300")).round_derived() + d("5");
        assert_eq!(row.sums.payout_commission, expected - cost);
        assert_eq!(row.derived.should_issued, -expected);
    }

    #[tokio::test]
    async fn test_business_date_follows_day_boundary() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;

        let before = ledger
            .record_transaction(inbound("g1", "100").at(TimeMs::new(
                MIDDAY_2024_03_10 + 18 * HOUR - 60_000,
            )))
            .await
            .unwrap();
        let after = ledger
            .record_transaction(inbound("g1", "100").at(TimeMs::new(MIDDAY_2024_03_10 + 18 * HOUR)))
            .await
            .unwrap();

        assert_eq!(before.business_date, date("2024-03-10"));
        assert_eq!(after.business_date, date("2024-03-11"));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_any_write() {
        let provider = Arc::new(
            MockRateProvider::new()
                .with_group(group_config("g1"))
                .with_global_rate(GlobalRate::BuyRate, d("16300")),
        );
        let (ledger, _temp) = setup_ledger(provider).await;

        let cases = vec![
            inbound("g1", "0"),
            inbound("g1", "-5"),
            inbound("  ", "100"),
            inbound("unconfigured", "100"),
            RecordRequest::new(
                GroupId::new("g1"),
                RecordAmount::Dispatch {
                    usdt_amount: d("0"),
                },
            ),
            RecordRequest::new(
                GroupId::new("unconfigured"),
                RecordAmount::ProxyPayout {
                    local_amount: d("100"),
                },
            ),
        ];
        for request in cases {
            let err = ledger.record_transaction(request).await.unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "got {:?}", err);
        }

        let window = ledger.window_for(date("2024-03-10"));
        assert!(ledger.repository().find_by_window(window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rate_read_writes_nothing() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider.clone()).await;

        provider.set_failing(true);
        let err = ledger.record_transaction(inbound("g1", "100")).await.unwrap_err();
        assert!(matches!(err, LedgerError::RateProvider(_)));

        assert!(ledger.get_daily_totals(date("2024-03-10")).await.unwrap().is_none());
        let window = ledger.window_for(date("2024-03-10"));
        assert!(ledger.repository().find_by_window(window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_dispatch_is_a_correction() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;

        for amount in ["500", "-120"] {
            ledger
                .record_transaction(
                    RecordRequest::new(
                        GroupId::new("g1"),
                        RecordAmount::Dispatch {
                            usdt_amount: d(amount),
                        },
                    )
                    .at(TimeMs::new(MIDDAY_2024_03_10))
                    .with_operator("alice"),
                )
                .await
                .unwrap();
        }

        let totals = ledger.get_daily_totals(date("2024-03-10")).await.unwrap().unwrap();
        assert_eq!(totals.sums.outgoing_count, 2);
        assert_eq!(totals.sums.outgoing_usdt, d("380"));
        assert_eq!(totals.derived.pending_usdt, d("-380"));
    }

    #[tokio::test]
    async fn test_out_of_range_amounts_are_rejected_before_any_write() {
        let mut tiny_rate = group_config("g1");
        tiny_rate.in_rate = d("0.0001");
        let provider = Arc::new(MockRateProvider::new().with_group(tiny_rate));
        let (ledger, _temp) = setup_ledger(provider).await;

        let err = ledger
            .record_transaction(inbound("g1", "10000000000000000000000000"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {:?}", err);

        let window = ledger.window_for(date("2024-03-10"));
        assert!(ledger.repository().find_by_window(window).await.unwrap().is_empty());
        assert!(ledger.get_daily_totals(date("2024-03-10")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overflowing_day_sums_roll_back() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;
        let huge = "50000000000000000000000000000";

        ledger.record_transaction(inbound("g1", huge)).await.unwrap();
        let before = ledger.get_daily_totals(date("2024-03-10")).await.unwrap().unwrap();

        let err = ledger.record_transaction(inbound("g1", huge)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {:?}", err);

        let after = ledger.get_daily_totals(date("2024-03-10")).await.unwrap().unwrap();
        assert_eq!(after, before);
        let window = ledger.window_for(date("2024-03-10"));
        assert_eq!(ledger.repository().find_by_window(window).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_instant_without_business_date_is_rejected() {
        let provider = Arc::new(MockRateProvider::new().with_group(group_config("g1")));
        let (ledger, _temp) = setup_ledger(provider).await;

        let err = ledger
            .record_transaction(inbound("g1", "100").at(TimeMs::new(9_000_000_000_000_000_000)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {:?}", err);

        let epoch_day = ledger.window_for(date("1970-01-01"));
        assert!(ledger.repository().find_by_window(epoch_day).await.unwrap().is_empty());
        assert!(ledger.get_daily_totals(date("1970-01-01")).await.unwrap().is_none());
    }
}

//! Ledger transaction records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{BusinessDate, Decimal, GroupId, TimeMs};

/// Closed set of bookkeeping events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Deposit in local currency, converted to settlement currency net of fee.
    Inbound,
    /// Settlement-currency dispatch to the group. Negative amounts correct earlier ones.
    Dispatch,
    /// Payout made on behalf of the group, priced at the group's outbound rate.
    ProxyPayout,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Inbound => "inbound",
            TransactionKind::Dispatch => "dispatch",
            TransactionKind::ProxyPayout => "proxy_payout",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(TransactionKind::Inbound),
            "dispatch" => Ok(TransactionKind::Dispatch),
            "proxy_payout" => Ok(TransactionKind::ProxyPayout),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

/// A transaction ready to be written to the ledger, with every fold
/// parameter already resolved and frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub group_id: GroupId,
    pub group_name: Option<String>,
    pub business_date: BusinessDate,
    pub occurred_at: TimeMs,
    pub local_amount: Option<Decimal>,
    pub usdt_amount: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
    pub fee_rate_percent: Option<Decimal>,
    pub handling_fee: Option<Decimal>,
    pub buy_rate: Option<Decimal>,
    pub sell_rate: Option<Decimal>,
    pub external_ref: Option<i64>,
    pub operator: Option<String>,
    pub note: Option<String>,
}

/// A stored, immutable ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: i64,
    pub kind: TransactionKind,
    pub group_id: GroupId,
    pub group_name: Option<String>,
    pub business_date: BusinessDate,
    pub occurred_at: TimeMs,
    /// Local-currency amount (Inbound, ProxyPayout).
    pub local_amount: Option<Decimal>,
    /// Settlement-currency amount as resolved at creation (Dispatch, ProxyPayout).
    pub usdt_amount: Option<Decimal>,
    /// Rate applied at creation: `inRate` for Inbound, `outRate` for ProxyPayout.
    pub exchange_rate: Option<Decimal>,
    pub fee_rate_percent: Option<Decimal>,
    pub handling_fee: Option<Decimal>,
    /// Global buy rate in effect at creation.
    pub buy_rate: Option<Decimal>,
    /// Global sell rate in effect at creation.
    pub sell_rate: Option<Decimal>,
    pub external_ref: Option<i64>,
    pub operator: Option<String>,
    pub note: Option<String>,
}

impl Transaction {
    /// Attach the identity assigned by the store.
    pub fn from_new(id: i64, new: NewTransaction) -> Self {
        Self {
            id,
            kind: new.kind,
            group_id: new.group_id,
            group_name: new.group_name,
            business_date: new.business_date,
            occurred_at: new.occurred_at,
            local_amount: new.local_amount,
            usdt_amount: new.usdt_amount,
            exchange_rate: new.exchange_rate,
            fee_rate_percent: new.fee_rate_percent,
            handling_fee: new.handling_fee,
            buy_rate: new.buy_rate,
            sell_rate: new.sell_rate,
            external_ref: new.external_ref,
            operator: new.operator,
            note: new.note,
        }
    }
}

/// Caller-supplied amount for a new transaction, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAmount {
    Inbound { local_amount: Decimal },
    Dispatch { usdt_amount: Decimal },
    ProxyPayout { local_amount: Decimal },
}

impl RecordAmount {
    pub fn kind(&self) -> TransactionKind {
        match self {
            RecordAmount::Inbound { .. } => TransactionKind::Inbound,
            RecordAmount::Dispatch { .. } => TransactionKind::Dispatch,
            RecordAmount::ProxyPayout { .. } => TransactionKind::ProxyPayout,
        }
    }
}

/// A validated request to record a transaction, before rates are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub group_id: GroupId,
    pub group_name: Option<String>,
    pub amount: RecordAmount,
    /// Defaults to the current time when absent.
    pub occurred_at: Option<TimeMs>,
    pub external_ref: Option<i64>,
    pub operator: Option<String>,
    pub note: Option<String>,
}

impl RecordRequest {
    pub fn new(group_id: GroupId, amount: RecordAmount) -> Self {
        Self {
            group_id,
            group_name: None,
            amount,
            occurred_at: None,
            external_ref: None,
            operator: None,
            note: None,
        }
    }

    pub fn with_group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = Some(name.into());
        self
    }

    pub fn at(mut self, occurred_at: TimeMs) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn with_external_ref(mut self, external_ref: i64) -> Self {
        self.external_ref = Some(external_ref);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

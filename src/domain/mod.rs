//! Domain types for the daybook ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, GroupId, BusinessDate
//! - Transaction records and record requests
//! - Aggregate rows (per group and per day) with derived figures
//! - Rate settings owned by the configuration service

pub mod aggregate;
pub mod decimal;
pub mod primitives;
pub mod rates;
pub mod transaction;

pub use aggregate::{
    AggregateSums, DailySummary, DailyTotals, DerivedFigures, FiguresOutOfRange,
    GroupDailyAggregate,
};
pub use decimal::{Decimal, DERIVED_SCALE};
pub use primitives::{BusinessDate, BusinessDateParseError, GroupId, TimeMs};
pub use rates::{GlobalRate, GroupConfig};
pub use transaction::{
    NewTransaction, RecordAmount, RecordRequest, Transaction, TransactionKind,
};

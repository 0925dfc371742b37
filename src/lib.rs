pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod rates;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    BusinessDate, Decimal, GroupId, RecordAmount, RecordRequest, TimeMs, Transaction,
    TransactionKind,
};
pub use error::AppError;
pub use ledger::{BulkDeleteOutcome, CancelTarget, Ledger, LedgerError, LedgerSettings};
pub use rates::{MockRateProvider, RateProvider, SqliteRateProvider};

//! Pure computation for the daybook ledger: no I/O in this module.

pub mod clock;
pub mod confirm;
pub mod fold;
pub mod locks;
pub mod sequence;

pub use clock::{BusinessClock, BusinessWindow, InstantOutOfRange};
pub use confirm::{ConfirmKey, ConfirmOutcome, ConfirmationHandshake};
pub use fold::{
    proxy_payout_usdt, transaction_delta, DayFold, FoldDirection, FoldError, FoldRates, LiveRates,
};
pub use locks::{DayGuard, DayLocks, RangeGuard};
pub use sequence::CodecError;

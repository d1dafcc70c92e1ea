// 8.0: trading engine. every mutation runs under the user's lock and lands in the
// store as a single write batch: account debit, rows and trade record together or not at all.

mod core;
mod orders;
mod positions;
mod results;

pub use core::TradingEngine;
pub use results::{
    CancelResult, CloseResult, FillResult, LedgerError, LiquidationResult, OpenPositionRequest, OpenResult,
    ValidationError,
};

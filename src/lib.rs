// paper-futures: simulated futures trading ledger.
// accounts, leveraged positions, pending orders and an append-only trade log, with a
// monitor that liquidates, takes profit, stops out and fills orders as prices move.
// all state lives behind the Store trait; the engine itself holds none.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, ids, Side, Symbol, Price, Quote, Leverage
//   2.x  math.rs: liquidation price, unrealized pnl, roe, taker fee
//   3.x  account.rs: account record + balance arithmetic
//   4.x  position.rs: position record, pnl views, exit triggers
//   5.x  order.rs: pending LIMIT / STOP_MARKET orders
//   6.x  trade.rs: trade audit record
//   7.x  config.rs: fees, margins, balances, env presets
//   8.x  engine/: trading engine: accounts, positions, orders
//   9.x  price_feed.rs: price snapshots over a watch channel
//   10.x monitor.rs: position monitor
//   11.x store/: store trait, write batches, in-memory store
//   12.x locks.rs: per-user async locks

// ledger records
pub mod account;
pub mod math;
pub mod order;
pub mod position;
pub mod trade;
pub mod types;

// engine and runtime
pub mod config;
pub mod engine;
pub mod monitor;
pub mod price_feed;
pub mod store;

mod locks;

// re exports for convenience
pub use account::*;
pub use config::*;
pub use engine::*;
pub use math::*;
pub use monitor::*;
pub use order::*;
pub use position::*;
pub use price_feed::*;
pub use store::*;
pub use trade::*;
pub use types::*;

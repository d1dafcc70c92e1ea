//! Record store boundary.
//!
//! The ledger talks to four logical tables (accounts, positions, orders, trades)
//! through the [`Store`] trait. Reads are point lookups and filtered lists keyed by
//! `user_id`. Every mutation goes through [`Store::commit`], which applies a
//! [`WriteBatch`] atomically: either every row in it lands or none do.
//!
//! Two guards are enforced at commit time:
//! - the account row carries an optimistic `version`; a batch that writes it must
//!   be based on the currently stored version.
//! - rows in a terminal status (CLOSED, LIQUIDATED, FILLED, CANCELLED) are frozen.

mod memory;

pub use memory::MemoryStore;

use crate::account::Account;
use crate::order::{Order, OrderStatus};
use crate::position::{Position, PositionStatus};
use crate::trade::Trade;
use crate::types::{OrderId, PositionId, UserId};
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Accounts,
    Positions,
    Orders,
    Trades,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::Accounts => "accounts",
            Table::Positions => "positions",
            Table::Orders => "orders",
            Table::Trades => "trades",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write conflict on {table}: {reason}")]
    Conflict { table: Table, reason: String },

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: Table, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn conflict(table: Table, reason: impl Into<String>) -> Self {
        StoreError::Conflict {
            table,
            reason: reason.into(),
        }
    }

    pub fn corrupt(table: Table, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            table,
            reason: reason.into(),
        }
    }
}

/// All writes for one logical ledger operation.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub user_id: UserId,
    pub account: Option<Account>,
    pub position_inserts: Vec<Position>,
    pub position_updates: Vec<Position>,
    pub order_inserts: Vec<Order>,
    pub order_updates: Vec<Order>,
    pub trade_inserts: Vec<Trade>,
}

impl WriteBatch {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            account: None,
            position_inserts: Vec::new(),
            position_updates: Vec::new(),
            order_inserts: Vec::new(),
            order_updates: Vec::new(),
            trade_inserts: Vec::new(),
        }
    }

    pub fn put_account(&mut self, account: Account) -> &mut Self {
        self.account = Some(account);
        self
    }

    pub fn insert_position(&mut self, position: Position) -> &mut Self {
        self.position_inserts.push(position);
        self
    }

    pub fn update_position(&mut self, position: Position) -> &mut Self {
        self.position_updates.push(position);
        self
    }

    pub fn insert_order(&mut self, order: Order) -> &mut Self {
        self.order_inserts.push(order);
        self
    }

    pub fn update_order(&mut self, order: Order) -> &mut Self {
        self.order_updates.push(order);
        self
    }

    pub fn insert_trade(&mut self, trade: Trade) -> &mut Self {
        self.trade_inserts.push(trade);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.account.is_none()
            && self.position_inserts.is_empty()
            && self.position_updates.is_empty()
            && self.order_inserts.is_empty()
            && self.order_updates.is_empty()
            && self.trade_inserts.is_empty()
    }

    pub fn row_count(&self) -> usize {
        usize::from(self.account.is_some())
            + self.position_inserts.len()
            + self.position_updates.len()
            + self.order_inserts.len()
            + self.order_updates.len()
            + self.trade_inserts.len()
    }
}

/// Transactional record store. Every call may be a network round trip.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>, StoreError>;

    /// Inserts a fresh account row. Returns `false` if the user already has one.
    async fn insert_account(&self, account: &Account) -> Result<bool, StoreError>;

    async fn get_position(
        &self,
        user_id: &UserId,
        id: PositionId,
    ) -> Result<Option<Position>, StoreError>;

    async fn get_order(&self, user_id: &UserId, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Oldest first.
    async fn list_positions(
        &self,
        user_id: &UserId,
        status: PositionStatus,
    ) -> Result<Vec<Position>, StoreError>;

    /// Oldest first.
    async fn list_orders(
        &self,
        user_id: &UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, StoreError>;

    /// Newest first, at most `limit` rows.
    async fn list_trades(&self, user_id: &UserId, limit: usize) -> Result<Vec<Trade>, StoreError>;

    /// Allocates a fresh row identity. Shared across tables.
    async fn next_id(&self) -> Result<u64, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

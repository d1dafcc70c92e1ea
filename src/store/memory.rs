//! In-process document store.
//!
//! Rows are kept as JSON documents, the shape a hosted backend hands back, and
//! every read goes through deserialize-and-validate before a typed record reaches
//! the engine.

use super::{Store, StoreError, Table, WriteBatch};
use crate::account::Account;
use crate::order::{Order, OrderStatus};
use crate::position::{Position, PositionStatus};
use crate::trade::Trade;
use crate::types::{OrderId, PositionId, UserId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<UserId, Value>,
    positions: BTreeMap<u64, Value>,
    orders: BTreeMap<u64, Value>,
    trades: BTreeMap<u64, Value>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Total rows across all tables. Handy for asserting that a failed batch wrote nothing.
    pub async fn row_count(&self) -> usize {
        let tables = self.tables.read().await;
        tables.accounts.len() + tables.positions.len() + tables.orders.len() + tables.trades.len()
    }

    /// Overwrites a raw document. Lets tests plant malformed rows.
    pub async fn put_raw_position(&self, id: u64, doc: Value) {
        self.tables.write().await.positions.insert(id, doc);
    }
}

fn encode<T: Serialize>(row: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(row)?)
}

fn encode_rows<'a, T, I, F>(rows: I, id_of: F) -> Result<Vec<(u64, Value)>, StoreError>
where
    T: Serialize + 'a,
    I: Iterator<Item = &'a T>,
    F: Fn(&T) -> u64,
{
    let mut docs = Vec::new();
    for row in rows {
        docs.push((id_of(row), encode(row)?));
    }
    Ok(docs)
}

fn decode<T: DeserializeOwned>(table: Table, doc: &Value) -> Result<T, StoreError> {
    serde_json::from_value(doc.clone()).map_err(|e| StoreError::corrupt(table, e.to_string()))
}

fn decode_account(doc: &Value) -> Result<Account, StoreError> {
    let account: Account = decode(Table::Accounts, doc)?;
    if account.balance.is_negative() {
        return Err(StoreError::corrupt(
            Table::Accounts,
            format!("{} has negative balance {}", account.user_id, account.balance),
        ));
    }
    Ok(account)
}

fn decode_position(doc: &Value) -> Result<Position, StoreError> {
    let position: Position = decode(Table::Positions, doc)?;
    position
        .validate()
        .map_err(|reason| StoreError::corrupt(Table::Positions, reason))?;
    Ok(position)
}

fn decode_order(doc: &Value) -> Result<Order, StoreError> {
    let order: Order = decode(Table::Orders, doc)?;
    order
        .validate()
        .map_err(|reason| StoreError::corrupt(Table::Orders, reason))?;
    Ok(order)
}

fn decode_trade(doc: &Value) -> Result<Trade, StoreError> {
    let trade: Trade = decode(Table::Trades, doc)?;
    trade
        .validate()
        .map_err(|reason| StoreError::corrupt(Table::Trades, reason))?;
    Ok(trade)
}

fn owned_by(doc: &Value, user_id: &UserId) -> bool {
    doc.get("user_id").and_then(Value::as_str) == Some(user_id.as_str())
}

fn check_owner(table: Table, owner: &UserId, user_id: &UserId) -> Result<(), StoreError> {
    if owner != user_id {
        return Err(StoreError::conflict(
            table,
            format!("row owned by {owner} written in batch for {user_id}"),
        ));
    }
    Ok(())
}

// only status, close fields, unrealized pnl and exits may move after insert
fn same_position_terms(stored: &Position, update: &Position) -> bool {
    stored.symbol == update.symbol
        && stored.side == update.side
        && stored.entry_price == update.entry_price
        && stored.quantity == update.quantity
        && stored.leverage == update.leverage
        && stored.margin == update.margin
        && stored.liq_price == update.liq_price
        && stored.margin_mode == update.margin_mode
        && stored.opened_at == update.opened_at
}

// only status and updated_at may move after insert
fn same_order_terms(stored: &Order, update: &Order) -> bool {
    stored.symbol == update.symbol
        && stored.side == update.side
        && stored.order_type == update.order_type
        && stored.price == update.price
        && stored.quantity == update.quantity
        && stored.notional == update.notional
        && stored.leverage == update.leverage
        && stored.margin_mode == update.margin_mode
        && stored.tp_price == update.tp_price
        && stored.sl_price == update.sl_price
        && stored.escrow == update.escrow
        && stored.created_at == update.created_at
}

impl Tables {
    // every precondition is checked before anything is written
    fn check_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let user_id = &batch.user_id;

        if let Some(account) = &batch.account {
            check_owner(Table::Accounts, &account.user_id, user_id)?;
            let stored = self
                .accounts
                .get(user_id)
                .ok_or_else(|| StoreError::conflict(Table::Accounts, "account row missing"))
                .and_then(decode_account)?;
            if account.version != stored.version + 1 {
                return Err(StoreError::conflict(
                    Table::Accounts,
                    format!(
                        "stale account write: stored version {}, batch version {}",
                        stored.version, account.version
                    ),
                ));
            }
            if account.balance.is_negative() {
                return Err(StoreError::conflict(Table::Accounts, "negative balance"));
            }
        }

        for position in &batch.position_inserts {
            check_owner(Table::Positions, &position.user_id, user_id)?;
            if self.positions.contains_key(&position.id.0) {
                return Err(StoreError::conflict(
                    Table::Positions,
                    format!("{} already exists", position.id),
                ));
            }
            position
                .validate()
                .map_err(|reason| StoreError::conflict(Table::Positions, reason))?;
        }

        for position in &batch.position_updates {
            check_owner(Table::Positions, &position.user_id, user_id)?;
            let stored = self
                .positions
                .get(&position.id.0)
                .ok_or_else(|| {
                    StoreError::conflict(Table::Positions, format!("{} missing", position.id))
                })
                .and_then(decode_position)?;
            if stored.status.is_terminal() {
                return Err(StoreError::conflict(
                    Table::Positions,
                    format!("{} is {:?} and frozen", position.id, stored.status),
                ));
            }
            if !same_position_terms(&stored, position) {
                return Err(StoreError::conflict(
                    Table::Positions,
                    format!("{} immutable fields changed", position.id),
                ));
            }
            position
                .validate()
                .map_err(|reason| StoreError::conflict(Table::Positions, reason))?;
        }

        for order in &batch.order_inserts {
            check_owner(Table::Orders, &order.user_id, user_id)?;
            if self.orders.contains_key(&order.id.0) {
                return Err(StoreError::conflict(
                    Table::Orders,
                    format!("{} already exists", order.id),
                ));
            }
            order
                .validate()
                .map_err(|reason| StoreError::conflict(Table::Orders, reason))?;
        }

        for order in &batch.order_updates {
            check_owner(Table::Orders, &order.user_id, user_id)?;
            let stored = self
                .orders
                .get(&order.id.0)
                .ok_or_else(|| StoreError::conflict(Table::Orders, format!("{} missing", order.id)))
                .and_then(decode_order)?;
            if stored.status.is_terminal() {
                return Err(StoreError::conflict(
                    Table::Orders,
                    format!("{} is {:?} and frozen", order.id, stored.status),
                ));
            }
            if !same_order_terms(&stored, order) {
                return Err(StoreError::conflict(
                    Table::Orders,
                    format!("{} immutable fields changed", order.id),
                ));
            }
            order
                .validate()
                .map_err(|reason| StoreError::conflict(Table::Orders, reason))?;
        }

        for trade in &batch.trade_inserts {
            check_owner(Table::Trades, &trade.user_id, user_id)?;
            if self.trades.contains_key(&trade.id.0) {
                return Err(StoreError::conflict(
                    Table::Trades,
                    format!("trade {} already exists", trade.id.0),
                ));
            }
            trade
                .validate()
                .map_err(|reason| StoreError::conflict(Table::Trades, reason))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        tables.accounts.get(user_id).map(decode_account).transpose()
    }

    async fn insert_account(&self, account: &Account) -> Result<bool, StoreError> {
        let doc = encode(account)?;
        let mut tables = self.tables.write().await;
        if tables.accounts.contains_key(&account.user_id) {
            return Ok(false);
        }
        tables.accounts.insert(account.user_id.clone(), doc);
        Ok(true)
    }

    async fn get_position(
        &self,
        user_id: &UserId,
        id: PositionId,
    ) -> Result<Option<Position>, StoreError> {
        let tables = self.tables.read().await;
        tables
            .positions
            .get(&id.0)
            .filter(|doc| owned_by(doc, user_id))
            .map(decode_position)
            .transpose()
    }

    async fn get_order(&self, user_id: &UserId, id: OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().await;
        tables
            .orders
            .get(&id.0)
            .filter(|doc| owned_by(doc, user_id))
            .map(decode_order)
            .transpose()
    }

    async fn list_positions(
        &self,
        user_id: &UserId,
        status: PositionStatus,
    ) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = Vec::new();
        for doc in tables.positions.values().filter(|doc| owned_by(doc, user_id)) {
            let position = decode_position(doc)?;
            if position.status == status {
                rows.push(position);
            }
        }
        rows.sort_by_key(|p| (p.opened_at, p.id));
        Ok(rows)
    }

    async fn list_orders(
        &self,
        user_id: &UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = Vec::new();
        for doc in tables.orders.values().filter(|doc| owned_by(doc, user_id)) {
            let order = decode_order(doc)?;
            if order.status == status {
                rows.push(order);
            }
        }
        rows.sort_by_key(|o| (o.created_at, o.id));
        Ok(rows)
    }

    async fn list_trades(&self, user_id: &UserId, limit: usize) -> Result<Vec<Trade>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = tables
            .trades
            .values()
            .filter(|doc| owned_by(doc, user_id))
            .map(decode_trade)
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by_key(|t| std::cmp::Reverse((t.created_at, t.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn next_id(&self) -> Result<u64, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        // encode up front so a serialization failure cannot leave a half-applied batch
        let account_doc = batch.account.as_ref().map(encode).transpose()?;
        let position_docs = encode_rows(
            batch.position_inserts.iter().chain(&batch.position_updates),
            |p| p.id.0,
        )?;
        let order_docs = encode_rows(
            batch.order_inserts.iter().chain(&batch.order_updates),
            |o| o.id.0,
        )?;
        let trade_docs = encode_rows(batch.trade_inserts.iter(), |t| t.id.0)?;

        let mut tables = self.tables.write().await;
        tables.check_batch(&batch)?;

        if let Some(doc) = account_doc {
            tables.accounts.insert(batch.user_id.clone(), doc);
        }
        tables.positions.extend(position_docs);
        tables.orders.extend(order_docs);
        tables.trades.extend(trade_docs);
        Ok(())
    }
}

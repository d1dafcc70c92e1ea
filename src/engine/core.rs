// 8.0 engine/core.rs: the trading engine. owns the injected store handle, the ledger config
// and one async lock per user so every read-compute-write cycle for a user is serialized.

use super::results::{LedgerError, ValidationError};
use crate::account::{Account, AccountSummary};
use crate::config::LedgerConfig;
use crate::locks::UserLocks;
use crate::math::{calc_roe, checked_unrealized_pnl};
use crate::order::{Order, OrderStatus};
use crate::position::{Position, PositionStatus};
use crate::price_feed::PriceSnapshot;
use crate::store::{Store, StoreError, Table, WriteBatch};
use crate::trade::Trade;
use crate::types::{Leverage, Quote, Timestamp, UserId};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument};

/** 8.1: main engine struct. all ledger state lives in the store, not here */
pub struct TradingEngine {
    pub(super) store: Arc<dyn Store>,
    pub(super) config: LedgerConfig,
    user_locks: UserLocks,
}

impl std::fmt::Debug for TradingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TradingEngine {
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            user_locks: UserLocks::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // not reentrant. public operations take it once, then use the unlocked helpers below.
    pub(super) async fn lock_user(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        self.user_locks.handle(user_id).await.lock_owned().await
    }

    pub(super) fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    // margin + taker fee for a given notional, the amount escrowed or debited on open.
    // their sum is checked too so callers can add them freely.
    pub(super) fn open_cost(
        &self,
        notional: Quote,
        leverage: Leverage,
    ) -> Result<(Quote, Quote), ValidationError> {
        let out_of_range = || ValidationError::AmountOutOfRange("margin and fee for this size");
        let margin = notional
            .value()
            .checked_div(leverage.value())
            .map(Quote::new)
            .ok_or_else(out_of_range)?;
        let fee = notional
            .value()
            .checked_mul(self.config.taker_fee_rate)
            .map(Quote::new)
            .ok_or_else(out_of_range)?;
        margin.checked_add(fee).ok_or_else(out_of_range)?;
        Ok((margin, fee))
    }

    pub(super) async fn next_id(&self) -> Result<u64, StoreError> {
        self.store.next_id().await
    }

    /// Returns the user's account, creating it with the default balance on first access.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn get_or_create_account(&self, user_id: &UserId) -> Result<Account, LedgerError> {
        let _guard = self.lock_user(user_id).await;
        self.load_or_create_account(user_id).await
    }

    pub(super) async fn load_or_create_account(
        &self,
        user_id: &UserId,
    ) -> Result<Account, LedgerError> {
        if let Some(account) = self.store.get_account(user_id).await? {
            return Ok(account);
        }

        let account = Account::new(user_id.clone(), self.config.starting_balance(), self.now());
        if self.store.insert_account(&account).await? {
            info!(balance = %account.balance, "account created");
            return Ok(account);
        }

        // another session won the insert
        self.store
            .get_account(user_id)
            .await?
            .ok_or_else(|| StoreError::conflict(Table::Accounts, "account vanished after insert").into())
    }

    /// Start over: force-close every open position without settling PnL, cancel every
    /// pending order without refunding escrow, and restore the starting balance.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn reset_account(&self, user_id: &UserId) -> Result<Account, LedgerError> {
        let _guard = self.lock_user(user_id).await;

        let mut account = self.load_or_create_account(user_id).await?;
        let positions = self.store.list_positions(user_id, PositionStatus::Open).await?;
        let orders = self.store.list_orders(user_id, OrderStatus::Pending).await?;
        let now = self.now();

        let mut batch = WriteBatch::new(user_id.clone());
        let position_count = positions.len();
        let order_count = orders.len();

        for mut position in positions {
            position.status = PositionStatus::Closed;
            position.closed_at = Some(now);
            batch.update_position(position);
        }

        for mut order in orders {
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            batch.update_order(order);
        }

        account.reset(self.config.starting_balance());
        account.touch(now);
        batch.put_account(account.clone());

        self.store.commit(batch).await?;

        info!(
            closed_positions = position_count,
            cancelled_orders = order_count,
            balance = %account.balance,
            "account reset"
        );
        Ok(account)
    }

    /// Current account row (created on first access).
    pub async fn account(&self, user_id: &UserId) -> Result<Account, LedgerError> {
        self.get_or_create_account(user_id).await
    }

    pub async fn open_positions(&self, user_id: &UserId) -> Result<Vec<Position>, LedgerError> {
        Ok(self.store.list_positions(user_id, PositionStatus::Open).await?)
    }

    pub async fn pending_orders(&self, user_id: &UserId) -> Result<Vec<Order>, LedgerError> {
        Ok(self.store.list_orders(user_id, OrderStatus::Pending).await?)
    }

    /// Trade history, newest first. `None` uses the configured page size.
    pub async fn trades(
        &self,
        user_id: &UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Trade>, LedgerError> {
        let limit = limit.unwrap_or(self.config.trade_history_limit);
        Ok(self.store.list_trades(user_id, limit).await?)
    }

    /// Balance, committed funds and live PnL. Positions without a price contribute no PnL.
    /// All three reads happen under the user lock so they describe one ledger state.
    pub async fn summary(
        &self,
        user_id: &UserId,
        prices: &PriceSnapshot,
    ) -> Result<AccountSummary, LedgerError> {
        let (account, positions, orders) = {
            let _guard = self.lock_user(user_id).await;
            let account = self.load_or_create_account(user_id).await?;
            let positions = self.store.list_positions(user_id, PositionStatus::Open).await?;
            let orders = self.store.list_orders(user_id, OrderStatus::Pending).await?;
            (account, positions, orders)
        };

        let margin_in_use: Quote = positions.iter().map(|p| p.margin).sum();
        let escrowed_in_orders: Quote = orders.iter().map(|o| o.escrow).sum();
        // a mark too far out to represent contributes nothing rather than panicking
        let total_unrealized_pnl: Quote = positions
            .iter()
            .filter_map(|p| {
                let mark = prices.get(&p.symbol)?;
                checked_unrealized_pnl(p.side, p.entry_price, mark, p.quantity)
            })
            .sum();

        let equity = account
            .balance
            .add(margin_in_use)
            .add(escrowed_in_orders)
            .add(total_unrealized_pnl);
        let roe = calc_roe(equity.sub(account.total_deposit), account.total_deposit);

        debug!(user = %user_id, %equity, %total_unrealized_pnl, "summary computed");

        Ok(AccountSummary {
            balance: account.balance,
            total_deposit: account.total_deposit,
            margin_in_use,
            escrowed_in_orders,
            total_unrealized_pnl,
            equity,
            roe,
            open_positions: positions.len(),
            pending_orders: orders.len(),
        })
    }
}

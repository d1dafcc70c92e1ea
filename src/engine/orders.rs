// 8.3: pending order resolution. a fill turns the escrow into position margin, a cancel
// hands it back. fill is monitor-driven so stale targets are a silent no-op.

use super::core::TradingEngine;
use super::results::{CancelResult, FillResult, LedgerError, ValidationError};
use crate::math::liq_price_for_mode;
use crate::order::OrderStatus;
use crate::position::{Position, PositionStatus};
use crate::store::WriteBatch;
use crate::trade::{Trade, TradeType};
use crate::types::{OrderId, PositionId, Price, Quote, TradeId, UserId};
use tracing::{debug, info, instrument, warn};

impl TradingEngine {
    /// Fills a pending order at `fill_price`, opening a position that carries the order's
    /// size, leverage and exits. Escrow is trued up to margin + fee at the fill price:
    /// a cheaper fill refunds the excess, a dearer one debits the difference.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn fill_order(
        &self,
        user_id: &UserId,
        order_id: OrderId,
        fill_price: Price,
    ) -> Result<Option<FillResult>, LedgerError> {
        let _guard = self.lock_user(user_id).await;

        let mut order = match self.store.get_order(user_id, order_id).await? {
            Some(order) if order.is_pending() => order,
            other => {
                debug!(
                    order = %order_id,
                    status = ?other.map(|o| o.status),
                    "fill target gone, skipping"
                );
                return Ok(None);
            }
        };

        let out_of_range = || ValidationError::AmountOutOfRange("order size at this fill price");
        let notional = order.notional_at(fill_price).ok_or_else(out_of_range)?;
        let (margin, fee) = self.open_cost(notional, order.leverage)?;
        let true_up = margin
            .add(fee)
            .checked_sub(order.escrow)
            .ok_or_else(out_of_range)?;

        let mut account = self.load_or_create_account(user_id).await?;
        let now = self.now();

        let shortfall = if true_up.is_negative() {
            account.settle(true_up.negate());
            Quote::zero()
        } else {
            account.debit_capped(true_up)
        };

        if !shortfall.is_zero() {
            warn!(
                order = %order_id,
                true_up = %true_up,
                shortfall = %shortfall,
                "balance could not cover fill true-up"
            );
        }

        let liq_price = liq_price_for_mode(
            order.margin_mode,
            order.side,
            fill_price,
            order.quantity,
            order.leverage,
            account.balance,
            self.config.maintenance_margin_rate,
        );

        order.status = OrderStatus::Filled;
        order.updated_at = now;

        let position = Position {
            id: PositionId(self.next_id().await?),
            user_id: user_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            entry_price: fill_price,
            quantity: order.quantity,
            leverage: order.leverage,
            margin,
            liq_price,
            margin_mode: order.margin_mode,
            tp_price: order.tp_price,
            sl_price: order.sl_price,
            unrealized_pnl: Quote::zero(),
            status: PositionStatus::Open,
            opened_at: now,
            closed_at: None,
            close_price: None,
        };

        let trade = Trade {
            id: TradeId(self.next_id().await?),
            user_id: user_id.clone(),
            position_id: Some(position.id),
            symbol: position.symbol.clone(),
            side: position.side,
            trade_type: TradeType::Open,
            price: fill_price,
            quantity: position.quantity,
            pnl: Quote::zero(),
            fee,
            created_at: now,
        };

        let mut batch = WriteBatch::new(user_id.clone());
        batch
            .update_order(order.clone())
            .insert_position(position.clone())
            .insert_trade(trade);
        if !true_up.is_zero() {
            account.touch(now);
            batch.put_account(account.clone());
        }
        self.store.commit(batch).await?;

        info!(
            order = %order.id,
            position = %position.id,
            fill_price = %fill_price,
            margin = %margin,
            true_up = %true_up,
            "order filled"
        );

        Ok(Some(FillResult {
            order,
            position,
            true_up,
            shortfall,
            account,
        }))
    }

    /// Cancels a pending order and refunds margin + fee recomputed from its placed size.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn cancel_order(
        &self,
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<CancelResult, LedgerError> {
        let _guard = self.lock_user(user_id).await;

        let mut order = self
            .store
            .get_order(user_id, order_id)
            .await?
            .ok_or(LedgerError::OrderNotFound(order_id))?;

        if !order.is_pending() {
            return Err(LedgerError::OrderNotPending {
                id: order_id,
                status: order.status,
            });
        }

        let (margin, fee) = self.open_cost(order.notional, order.leverage)?;
        let refunded = margin.add(fee);

        let mut account = self.load_or_create_account(user_id).await?;
        let now = self.now();
        account.settle(refunded);
        account.touch(now);

        order.status = OrderStatus::Cancelled;
        order.updated_at = now;

        let mut batch = WriteBatch::new(user_id.clone());
        batch.update_order(order.clone()).put_account(account.clone());
        self.store.commit(batch).await?;

        info!(order = %order.id, refunded = %refunded, balance = %account.balance, "order cancelled");

        Ok(CancelResult {
            order,
            refunded,
            account,
        })
    }
}

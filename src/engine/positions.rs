//! Position lifecycle: open (market fill or pending placement), close, liquidate.

use super::core::TradingEngine;
use super::results::{CloseResult, LedgerError, LiquidationResult, OpenPositionRequest, OpenResult, ValidationError};
use crate::math::{checked_taker_fee, checked_unrealized_pnl, liq_price_for_mode};
use crate::order::{Order, OrderStatus};
use crate::position::{Position, PositionStatus};
use crate::store::WriteBatch;
use crate::trade::{Trade, TradeType};
use crate::types::{OrderId, PositionId, Price, Quote, Side, TradeId, UserId};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

/// TP must sit on the profitable side of `reference`, SL on the losing side.
pub(super) fn check_exit_prices(
    side: Side,
    reference: Price,
    tp: Option<Price>,
    sl: Option<Price>,
) -> Result<(), ValidationError> {
    if let Some(tp) = tp {
        let ok = match side {
            Side::Long => tp > reference,
            Side::Short => tp < reference,
        };
        if !ok {
            return Err(ValidationError::TakeProfitWrongSide { side, tp, reference });
        }
    }
    if let Some(sl) = sl {
        let ok = match side {
            Side::Long => sl < reference,
            Side::Short => sl > reference,
        };
        if !ok {
            return Err(ValidationError::StopLossWrongSide { side, sl, reference });
        }
    }
    Ok(())
}

// sizing of an accepted request, worked out before the user lock is taken
struct OpenSizing {
    quantity: Decimal,
    margin: Quote,
    fee: Quote,
}

impl TradingEngine {
    fn validate_open(&self, request: &OpenPositionRequest) -> Result<OpenSizing, ValidationError> {
        if request.quantity_usdt.value() <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveSize(request.quantity_usdt));
        }
        if request.leverage.get() > self.config.max_leverage {
            return Err(ValidationError::LeverageTooHigh {
                requested: request.leverage,
                max: self.config.max_leverage,
            });
        }
        check_exit_prices(request.side, request.price, request.tp_price, request.sl_price)?;

        let quantity = request
            .quantity_usdt
            .value()
            .checked_div(request.price.value())
            .ok_or(ValidationError::AmountOutOfRange("quantity at this price"))?;
        if quantity.is_zero() {
            return Err(ValidationError::AmountOutOfRange("quantity rounds to zero"));
        }
        let (margin, fee) = self.open_cost(request.quantity_usdt, request.leverage)?;
        Ok(OpenSizing { quantity, margin, fee })
    }

    /// Opens a MARKET position at `request.price`, or places a LIMIT / STOP_MARKET order
    /// with margin + fee escrowed. Fails with `InsufficientBalance` as a full no-op.
    #[instrument(skip(self, request), fields(user = %user_id, symbol = %request.symbol, side = %request.side))]
    pub async fn open_position(
        &self,
        user_id: &UserId,
        request: OpenPositionRequest,
    ) -> Result<OpenResult, LedgerError> {
        let OpenSizing { quantity, margin, fee } = self.validate_open(&request)?;
        let total_cost = margin.add(fee);

        let _guard = self.lock_user(user_id).await;
        let mut account = self.load_or_create_account(user_id).await?;

        account.reserve(total_cost)?;

        let now = self.now();
        account.touch(now);
        let mut batch = WriteBatch::new(user_id.clone());

        if request.order_type.is_pending_kind() {
            let order = Order {
                id: OrderId(self.next_id().await?),
                user_id: user_id.clone(),
                symbol: request.symbol,
                side: request.side,
                order_type: request.order_type,
                price: request.price,
                quantity,
                notional: request.quantity_usdt,
                leverage: request.leverage,
                margin_mode: request.margin_mode,
                tp_price: request.tp_price,
                sl_price: request.sl_price,
                escrow: total_cost,
                status: OrderStatus::Pending,
                created_at: now,
                updated_at: now,
            };

            batch.insert_order(order.clone()).put_account(account.clone());
            self.store.commit(batch).await?;

            info!(
                order = %order.id,
                order_type = ?order.order_type,
                price = %order.price,
                escrow = %total_cost,
                balance = %account.balance,
                "order placed"
            );

            return Ok(OpenResult {
                position: None,
                order: Some(order),
                trade: None,
                fee,
                account,
            });
        }

        // account.balance is already net of this open, so cross mode only counts what is left
        let liq_price = liq_price_for_mode(
            request.margin_mode,
            request.side,
            request.price,
            quantity,
            request.leverage,
            account.balance,
            self.config.maintenance_margin_rate,
        );

        let position = Position {
            id: PositionId(self.next_id().await?),
            user_id: user_id.clone(),
            symbol: request.symbol,
            side: request.side,
            entry_price: request.price,
            quantity,
            leverage: request.leverage,
            margin,
            liq_price,
            margin_mode: request.margin_mode,
            tp_price: request.tp_price,
            sl_price: request.sl_price,
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
            price: position.entry_price,
            quantity,
            pnl: Quote::zero(),
            fee,
            created_at: now,
        };

        batch
            .insert_position(position.clone())
            .insert_trade(trade.clone())
            .put_account(account.clone());
        self.store.commit(batch).await?;

        info!(
            position = %position.id,
            entry = %position.entry_price,
            quantity = %position.quantity,
            margin = %margin,
            liq_price = %liq_price,
            balance = %account.balance,
            "position opened"
        );

        Ok(OpenResult {
            position: Some(position),
            order: None,
            trade: Some(trade),
            fee,
            account,
        })
    }

    /// Settles an open position at `close_price`. A loss deeper than the margin is
    /// absorbed: the balance floors at zero.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn close_position(
        &self,
        user_id: &UserId,
        position_id: PositionId,
        close_price: Price,
    ) -> Result<CloseResult, LedgerError> {
        let _guard = self.lock_user(user_id).await;

        let mut position = self
            .store
            .get_position(user_id, position_id)
            .await?
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        if !position.is_open() {
            return Err(LedgerError::PositionNotOpen {
                id: position_id,
                status: position.status,
            });
        }

        let out_of_range = || ValidationError::AmountOutOfRange("settlement at this close price");
        let pnl = checked_unrealized_pnl(position.side, position.entry_price, close_price, position.quantity)
            .ok_or_else(out_of_range)?;
        let fee = checked_taker_fee(position.quantity, close_price, self.config.taker_fee_rate)
            .ok_or_else(out_of_range)?;
        let return_amount = position
            .margin
            .checked_add(pnl)
            .and_then(|amount| amount.checked_sub(fee))
            .ok_or_else(out_of_range)?;

        let mut account = self.load_or_create_account(user_id).await?;
        let now = self.now();
        account.settle(return_amount);
        account.touch(now);

        position.status = PositionStatus::Closed;
        position.close_price = Some(close_price);
        position.closed_at = Some(now);
        position.unrealized_pnl = pnl;

        let trade = Trade {
            id: TradeId(self.next_id().await?),
            user_id: user_id.clone(),
            position_id: Some(position.id),
            symbol: position.symbol.clone(),
            side: position.side,
            trade_type: TradeType::Close,
            price: close_price,
            quantity: position.quantity,
            pnl,
            fee,
            created_at: now,
        };

        let mut batch = WriteBatch::new(user_id.clone());
        batch
            .update_position(position.clone())
            .insert_trade(trade)
            .put_account(account.clone());
        self.store.commit(batch).await?;

        info!(
            position = %position.id,
            close_price = %close_price,
            pnl = %pnl,
            fee = %fee,
            balance = %account.balance,
            "position closed"
        );

        Ok(CloseResult {
            position,
            pnl,
            fee,
            account,
        })
    }

    /// Forfeits the whole margin. Absent or already-resolved positions are a silent
    /// no-op since the monitor can race a manual close.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn liquidate_position(
        &self,
        user_id: &UserId,
        position_id: PositionId,
        liq_price: Price,
    ) -> Result<Option<LiquidationResult>, LedgerError> {
        let _guard = self.lock_user(user_id).await;

        let mut position = match self.store.get_position(user_id, position_id).await? {
            Some(position) if position.is_open() => position,
            other => {
                debug!(
                    position = %position_id,
                    status = ?other.map(|p| p.status),
                    "liquidation target gone, skipping"
                );
                return Ok(None);
            }
        };

        let forfeited = position.margin;
        let now = self.now();

        position.status = PositionStatus::Liquidated;
        position.close_price = Some(liq_price);
        position.closed_at = Some(now);
        position.unrealized_pnl = forfeited.negate();

        let trade = Trade {
            id: TradeId(self.next_id().await?),
            user_id: user_id.clone(),
            position_id: Some(position.id),
            symbol: position.symbol.clone(),
            side: position.side,
            trade_type: TradeType::Liquidation,
            price: liq_price,
            quantity: position.quantity,
            pnl: forfeited.negate(),
            fee: Quote::zero(),
            created_at: now,
        };

        // margin left the balance at open, nothing to debit now
        let mut batch = WriteBatch::new(user_id.clone());
        batch.update_position(position.clone()).insert_trade(trade);
        self.store.commit(batch).await?;

        info!(
            position = %position.id,
            price = %liq_price,
            forfeited = %forfeited,
            "position liquidated"
        );

        Ok(Some(LiquidationResult {
            position,
            forfeited_margin: forfeited,
        }))
    }

    /// Sets or clears TP/SL on an open position.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn update_tp_sl(
        &self,
        user_id: &UserId,
        position_id: PositionId,
        tp_price: Option<Price>,
        sl_price: Option<Price>,
    ) -> Result<Position, LedgerError> {
        let _guard = self.lock_user(user_id).await;

        let mut position = self
            .store
            .get_position(user_id, position_id)
            .await?
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        if !position.is_open() {
            return Err(LedgerError::PositionNotOpen {
                id: position_id,
                status: position.status,
            });
        }

        check_exit_prices(position.side, position.entry_price, tp_price, sl_price)?;

        position.tp_price = tp_price;
        position.sl_price = sl_price;

        let mut batch = WriteBatch::new(user_id.clone());
        batch.update_position(position.clone());
        self.store.commit(batch).await?;

        info!(position = %position.id, tp = ?tp_price, sl = ?sl_price, "exit prices updated");
        Ok(position)
    }
}

// 8.0.2: request, result and error types for engine operations.

use crate::account::{Account, AccountError};
use crate::order::{Order, OrderStatus};
use crate::position::{Position, PositionStatus};
use crate::store::StoreError;
use crate::trade::Trade;
use crate::types::{Leverage, MarginMode, OrderId, OrderType, PositionId, Price, Quote, Side, Symbol};
use serde::{Deserialize, Serialize};

/// Everything a caller supplies to open a position or place a pending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    // fill price for MARKET, trigger/limit price otherwise
    pub price: Price,
    pub quantity_usdt: Quote,
    pub leverage: Leverage,
    pub tp_price: Option<Price>,
    pub sl_price: Option<Price>,
    #[serde(default)]
    pub margin_mode: MarginMode,
}

impl OpenPositionRequest {
    pub fn new(
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity_usdt: Quote,
        leverage: Leverage,
    ) -> Self {
        Self {
            symbol,
            side,
            order_type,
            price,
            quantity_usdt,
            leverage,
            tp_price: None,
            sl_price: None,
            margin_mode: MarginMode::default(),
        }
    }

    pub fn market(symbol: Symbol, side: Side, price: Price, quantity_usdt: Quote, leverage: Leverage) -> Self {
        Self::new(symbol, side, OrderType::Market, price, quantity_usdt, leverage)
    }

    pub fn limit(symbol: Symbol, side: Side, price: Price, quantity_usdt: Quote, leverage: Leverage) -> Self {
        Self::new(symbol, side, OrderType::Limit, price, quantity_usdt, leverage)
    }

    pub fn stop_market(symbol: Symbol, side: Side, price: Price, quantity_usdt: Quote, leverage: Leverage) -> Self {
        Self::new(symbol, side, OrderType::StopMarket, price, quantity_usdt, leverage)
    }

    pub fn with_take_profit(mut self, tp: Price) -> Self {
        self.tp_price = Some(tp);
        self
    }

    pub fn with_stop_loss(mut self, sl: Price) -> Self {
        self.sl_price = Some(sl);
        self
    }

    pub fn with_margin_mode(mut self, mode: MarginMode) -> Self {
        self.margin_mode = mode;
        self
    }
}

/// MARKET opens return a position, everything else returns the resting order.
#[derive(Debug, Clone)]
pub struct OpenResult {
    pub position: Option<Position>,
    pub order: Option<Order>,
    pub trade: Option<Trade>,
    pub fee: Quote,
    pub account: Account,
}

#[derive(Debug, Clone)]
pub struct CloseResult {
    pub position: Position,
    pub pnl: Quote,
    pub fee: Quote,
    pub account: Account,
}

#[derive(Debug, Clone)]
pub struct LiquidationResult {
    pub position: Position,
    pub forfeited_margin: Quote,
}

#[derive(Debug, Clone)]
pub struct FillResult {
    pub order: Order,
    pub position: Position,
    // positive = extra debited at fill, negative = refunded
    pub true_up: Quote,
    pub shortfall: Quote,
    pub account: Account,
}

#[derive(Debug, Clone)]
pub struct CancelResult {
    pub order: Order,
    pub refunded: Quote,
    pub account: Account,
}

/// Caller input the engine refuses before touching any state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("order size must be positive, got {0}")]
    NonPositiveSize(Quote),

    #[error("leverage {requested} exceeds maximum {max}x")]
    LeverageTooHigh { requested: Leverage, max: u32 },

    #[error("take profit {tp} is on the wrong side of {reference} for a {side} position")]
    TakeProfitWrongSide { side: Side, tp: Price, reference: Price },

    #[error("stop loss {sl} is on the wrong side of {reference} for a {side} position")]
    StopLossWrongSide { side: Side, sl: Price, reference: Price },

    #[error("amount out of range: {0}")]
    AmountOutOfRange(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Quote, available: Quote },

    #[error("{0} not found")]
    PositionNotFound(PositionId),

    #[error("{0} not found")]
    OrderNotFound(OrderId),

    #[error("{id} is {status:?}, not open")]
    PositionNotOpen { id: PositionId, status: PositionStatus },

    #[error("{id} is {status:?}, not pending")]
    OrderNotPending { id: OrderId, status: OrderStatus },

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<AccountError> for LedgerError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::InsufficientBalance { required, available } => {
                LedgerError::InsufficientBalance { required, available }
            }
        }
    }
}

impl LedgerError {
    /// Short text for the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::InsufficientBalance { required, available } => format!(
                "Not enough balance: need {:.2} USDT, have {:.2} USDT",
                required.value(),
                available.value()
            ),
            LedgerError::PositionNotFound(_) => "Position not found".to_string(),
            LedgerError::OrderNotFound(_) => "Order not found".to_string(),
            LedgerError::PositionNotOpen { .. } => "Position is already closed".to_string(),
            LedgerError::OrderNotPending { .. } => "Order is no longer pending".to_string(),
            LedgerError::Validation(e) => e.to_string(),
            LedgerError::Store(_) => "Trading is temporarily unavailable, try again".to_string(),
        }
    }

    /// True for the not-found / wrong-state family that monitor races produce.
    pub fn is_stale_target(&self) -> bool {
        matches!(
            self,
            LedgerError::PositionNotFound(_)
                | LedgerError::OrderNotFound(_)
                | LedgerError::PositionNotOpen { .. }
                | LedgerError::OrderNotPending { .. }
        )
    }
}

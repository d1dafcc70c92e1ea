// 5.0: pending orders. LIMIT and STOP_MARKET instructions that rest until the mark crosses
// their price. margin + fee is escrowed out of the balance when the order is placed.

use crate::types::{Leverage, MarginMode, OrderId, OrderType, Price, Quote, Side, Symbol, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub quantity: Decimal,
    // USDT size requested at placement, i.e. quantity * price
    pub notional: Quote,
    pub leverage: Leverage,
    pub margin_mode: MarginMode,
    pub tp_price: Option<Price>,
    pub sl_price: Option<Price>,
    // margin + fee taken from the balance at placement
    pub escrow: Quote,
    pub status: OrderStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Notional at another price, scaled from the placed size so a fill at the
    /// order price reproduces the placed notional exactly. `None` on overflow.
    pub fn notional_at(&self, fill_price: Price) -> Option<Quote> {
        if fill_price == self.price {
            return Some(self.notional);
        }
        self.notional
            .value()
            .checked_mul(fill_price.value())?
            .checked_div(self.price.value())
            .map(Quote::new)
    }

    /// LIMIT buys the dip and sells the rip. STOP_MARKET chases the breakout.
    pub fn should_fill(&self, mark_price: Price) -> bool {
        match (self.side, self.order_type) {
            (Side::Long, OrderType::Limit) => mark_price <= self.price,
            (Side::Short, OrderType::Limit) => mark_price >= self.price,
            (Side::Long, OrderType::StopMarket) => mark_price >= self.price,
            (Side::Short, OrderType::StopMarket) => mark_price <= self.price,
            (_, OrderType::Market) => false,
        }
    }

    /// Price the resulting position opens at once triggered.
    /// Limits fill at their limit, stops at whatever the market is.
    pub fn fill_price(&self, mark_price: Price) -> Price {
        match self.order_type {
            OrderType::Limit => self.price,
            OrderType::StopMarket | OrderType::Market => mark_price,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.order_type == OrderType::Market {
            return Err(format!("{} is a MARKET order; those never rest", self.id));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(format!("{} has non-positive quantity {}", self.id, self.quantity));
        }
        if self.notional.value() <= Decimal::ZERO {
            return Err(format!("{} has non-positive notional {}", self.id, self.notional));
        }
        if self.escrow.is_negative() {
            return Err(format!("{} has negative escrow {}", self.id, self.escrow));
        }
        Ok(())
    }
}

// 4.0: leveraged position records. pnl = side * quantity * (mark - entry).
// side, leverage, entry and margin never change after creation. only the close/liquidation
// fields and tp/sl move, and terminal rows are frozen.

use crate::math::{calc_roe, calc_unrealized_pnl};
use crate::types::{Leverage, MarginMode, PositionId, Price, Quote, Side, Symbol, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Price,
    pub quantity: Decimal,
    pub leverage: Leverage,
    pub margin: Quote,
    pub liq_price: Price,
    pub margin_mode: MarginMode,
    pub tp_price: Option<Price>,
    pub sl_price: Option<Price>,
    // snapshot. authoritative only once the position is closed or liquidated.
    pub unrealized_pnl: Quote,
    pub status: PositionStatus,
    pub opened_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub close_price: Option<Price>,
}

/// Which exit condition a mark price hits, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    Liquidation,
    TakeProfit(Price),
    StopLoss(Price),
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn notional_value(&self, mark_price: Price) -> Quote {
        Quote::new(self.quantity * mark_price.value())
    }

    // 4.1: paper gains/losses based on current price
    pub fn unrealized_pnl_at(&self, mark_price: Price) -> Quote {
        calc_unrealized_pnl(self.side, self.entry_price, mark_price, self.quantity)
    }

    pub fn roe_at(&self, mark_price: Price) -> Decimal {
        calc_roe(self.unrealized_pnl_at(mark_price), self.margin)
    }

    pub fn hits_liquidation(&self, mark_price: Price) -> bool {
        match self.side {
            Side::Long => mark_price <= self.liq_price,
            Side::Short => mark_price >= self.liq_price,
        }
    }

    pub fn hits_take_profit(&self, mark_price: Price) -> Option<Price> {
        let tp = self.tp_price?;
        let hit = match self.side {
            Side::Long => mark_price >= tp,
            Side::Short => mark_price <= tp,
        };
        hit.then_some(tp)
    }

    pub fn hits_stop_loss(&self, mark_price: Price) -> Option<Price> {
        let sl = self.sl_price?;
        let hit = match self.side {
            Side::Long => mark_price <= sl,
            Side::Short => mark_price >= sl,
        };
        hit.then_some(sl)
    }

    // 4.2: first match wins. liquidation beats tp beats sl.
    pub fn exit_trigger(&self, mark_price: Price) -> Option<ExitTrigger> {
        if !self.is_open() {
            return None;
        }
        if self.hits_liquidation(mark_price) {
            return Some(ExitTrigger::Liquidation);
        }
        if let Some(tp) = self.hits_take_profit(mark_price) {
            return Some(ExitTrigger::TakeProfit(tp));
        }
        self.hits_stop_loss(mark_price).map(ExitTrigger::StopLoss)
    }

    /// Checks the record against its lifecycle invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("{} has non-positive quantity {}", self.id, self.quantity));
        }
        if self.is_open() && self.margin.value() <= Decimal::ZERO {
            return Err(format!("{} is open with non-positive margin {}", self.id, self.margin));
        }
        if self.status.is_terminal() && self.closed_at.is_none() {
            return Err(format!("{} is {:?} without closed_at", self.id, self.status));
        }
        // reset force-closes without a price, liquidation never does
        if self.status == PositionStatus::Liquidated && self.close_price.is_none() {
            return Err(format!("{} is liquidated without close_price", self.id));
        }
        Ok(())
    }
}

// 6.0: append-only audit trail. one row per ledger-affecting transition, never updated.

use crate::types::{PositionId, Price, Quote, Side, Symbol, Timestamp, TradeId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Open,
    Close,
    Liquidation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub user_id: UserId,
    pub position_id: Option<PositionId>,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    pub price: Price,
    pub quantity: Decimal,
    pub pnl: Quote,
    pub fee: Quote,
    pub created_at: Timestamp,
}

impl Trade {
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("trade {} has non-positive quantity", self.id.0));
        }
        if self.fee.is_negative() {
            return Err(format!("trade {} has negative fee", self.id.0));
        }
        Ok(())
    }
}

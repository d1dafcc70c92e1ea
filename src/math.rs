//! Ledger math: liquidation price, unrealized PnL and ROE.
//!
//! Pure functions with no state. Everything here works in `Decimal` so that
//! repeated open/close cycles never accumulate floating point drift.

use crate::types::{Leverage, MarginMode, Price, Quote, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Maintenance margin rate used by the default configuration.
pub const MAINTENANCE_MARGIN_RATE: Decimal = dec!(0.004);

/// Taker fee rate charged on notional at open and close.
pub const TAKER_FEE_RATE: Decimal = dec!(0.0004);

// long liquidation prices can fall to zero under deep cross cushions. keep them representable.
const MIN_LIQ_PRICE: Decimal = dec!(0.0001);

/// Isolated liquidation price.
///
/// LONG: `entry * (1 - 1/leverage + mmr)`, SHORT: `entry * (1 + 1/leverage - mmr)`.
pub fn calc_liq_price(side: Side, entry_price: Price, leverage: Leverage, mmr: Decimal) -> Price {
    liq_price_with_cushion(side, entry_price, leverage.initial_margin_fraction(), mmr)
}

/// Cross liquidation price.
///
/// The free balance left in the account widens the cushion in proportion to the
/// position notional. With no free balance this is the isolated price.
pub fn calc_cross_liq_price(
    side: Side,
    entry_price: Price,
    quantity: Decimal,
    leverage: Leverage,
    available_balance: Quote,
    mmr: Decimal,
) -> Price {
    let notional = quantity.saturating_mul(entry_price.value());
    let extra = if notional.is_zero() {
        Decimal::ZERO
    } else {
        available_balance
            .floor_zero()
            .value()
            .checked_div(notional)
            .unwrap_or(Decimal::MAX)
    };
    liq_price_with_cushion(
        side,
        entry_price,
        leverage.initial_margin_fraction().saturating_add(extra),
        mmr,
    )
}

/// Dispatches on margin mode. `available_balance` is ignored for ISOLATED.
pub fn liq_price_for_mode(
    mode: MarginMode,
    side: Side,
    entry_price: Price,
    quantity: Decimal,
    leverage: Leverage,
    available_balance: Quote,
    mmr: Decimal,
) -> Price {
    match mode {
        MarginMode::Isolated => calc_liq_price(side, entry_price, leverage, mmr),
        MarginMode::Cross => {
            calc_cross_liq_price(side, entry_price, quantity, leverage, available_balance, mmr)
        }
    }
}

fn liq_price_with_cushion(side: Side, entry_price: Price, cushion: Decimal, mmr: Decimal) -> Price {
    // saturates: a cushion wider than Decimal's range just means never liquidated
    let factor = match side {
        Side::Long => Decimal::ONE.saturating_sub(cushion).saturating_add(mmr),
        Side::Short => Decimal::ONE.saturating_add(cushion).saturating_sub(mmr),
    };
    let liq = entry_price.value().saturating_mul(factor);
    Price::new_unchecked(liq.max(MIN_LIQ_PRICE))
}

/// LONG: `quantity * (current - entry)`, SHORT: `quantity * (entry - current)`. No fees.
pub fn calc_unrealized_pnl(
    side: Side,
    entry_price: Price,
    current_price: Price,
    quantity: Decimal,
) -> Quote {
    let delta = current_price.value() - entry_price.value();
    Quote::new(side.sign() * quantity * delta)
}

/// Same as [`calc_unrealized_pnl`], `None` when the result leaves Decimal's range.
pub fn checked_unrealized_pnl(
    side: Side,
    entry_price: Price,
    current_price: Price,
    quantity: Decimal,
) -> Option<Quote> {
    let delta = current_price.value().checked_sub(entry_price.value())?;
    quantity
        .checked_mul(delta)?
        .checked_mul(side.sign())
        .map(Quote::new)
}

/// Return on equity in percent. Zero margin yields zero.
pub fn calc_roe(pnl: Quote, margin: Quote) -> Decimal {
    if margin.is_zero() {
        return Decimal::ZERO;
    }
    pnl.value() / margin.value() * dec!(100)
}

/// Taker fee on a notional amount.
pub fn taker_fee(notional: Decimal, fee_rate: Decimal) -> Quote {
    Quote::new(notional * fee_rate)
}

/// Fee on `quantity` filled at `price`, `None` if the notional overflows.
pub fn checked_taker_fee(quantity: Decimal, price: Price, fee_rate: Decimal) -> Option<Quote> {
    quantity
        .checked_mul(price.value())?
        .checked_mul(fee_rate)
        .map(Quote::new)
}

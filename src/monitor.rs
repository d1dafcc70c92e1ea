// 10.0: position monitor. watches one user's open positions and pending orders against
// the latest price snapshot and fires liquidations, TP/SL closes and order fills.
//
// every pass reloads from the store. nothing is cached between passes because another
// session may have mutated the rows in the meantime.

use crate::engine::{LedgerError, TradingEngine};
use crate::order::Order;
use crate::position::{ExitTrigger, Position};
use crate::price_feed::{PriceFeedReceiver, PriceSnapshot};
use crate::types::{OrderId, PositionId, Price, UserId};
use crate::locks::UserLocks;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/** 10.1: one decision taken by a pass */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Liquidate { position: PositionId, price: Price },
    TakeProfit { position: PositionId, price: Price },
    StopLoss { position: PositionId, price: Price },
    Fill { order: OrderId, price: Price },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub applied: Vec<MonitorAction>,
    // targets resolved elsewhere between load and execution
    pub stale: Vec<MonitorAction>,
    // refused by the engine, e.g. a settlement outside Decimal's range. left as is.
    pub rejected: Vec<MonitorAction>,
}

// how one action ended
enum Executed {
    Applied,
    Stale,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// a previous pass for this user is still running
    Skipped,
    /// nothing open or pending
    Idle,
    Evaluated(PassReport),
}

pub struct PositionMonitor {
    engine: Arc<TradingEngine>,
    in_flight: UserLocks,
}

impl std::fmt::Debug for PositionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionMonitor").finish_non_exhaustive()
    }
}

impl PositionMonitor {
    pub fn new(engine: Arc<TradingEngine>) -> Self {
        Self {
            engine,
            in_flight: UserLocks::new(),
        }
    }

    pub fn engine(&self) -> &Arc<TradingEngine> {
        &self.engine
    }

    /// 10.2: decides what a pass should do. positions first, then orders.
    /// per position the first matching exit wins: liquidation, take profit, stop loss.
    /// anything whose symbol has no price in the snapshot is left alone.
    pub fn plan(positions: &[Position], orders: &[Order], prices: &PriceSnapshot) -> Vec<MonitorAction> {
        let mut actions = Vec::new();

        for position in positions {
            let Some(mark) = prices.get(&position.symbol) else {
                continue;
            };
            let action = match position.exit_trigger(mark) {
                Some(ExitTrigger::Liquidation) => MonitorAction::Liquidate {
                    position: position.id,
                    price: mark,
                },
                Some(ExitTrigger::TakeProfit(tp)) => MonitorAction::TakeProfit {
                    position: position.id,
                    price: tp,
                },
                Some(ExitTrigger::StopLoss(sl)) => MonitorAction::StopLoss {
                    position: position.id,
                    price: sl,
                },
                None => continue,
            };
            actions.push(action);
        }

        for order in orders.iter().filter(|o| o.is_pending()) {
            let Some(mark) = prices.get(&order.symbol) else {
                continue;
            };
            if order.should_fill(mark) {
                actions.push(MonitorAction::Fill {
                    order: order.id,
                    price: order.fill_price(mark),
                });
            }
        }

        actions
    }

    /// 10.3: one evaluation pass. skipped outright when another pass for the same user
    /// has not finished. store failures abort the rest of the pass.
    #[instrument(skip(self, prices), fields(user = %user_id))]
    pub async fn run_pass(&self, user_id: &UserId, prices: &PriceSnapshot) -> Result<PassOutcome, LedgerError> {
        let lock = self.in_flight.handle(user_id).await;
        let Ok(_pass) = lock.try_lock_owned() else {
            debug!("previous pass still running, skipping");
            return Ok(PassOutcome::Skipped);
        };

        let positions = self.engine.open_positions(user_id).await?;
        let orders = self.engine.pending_orders(user_id).await?;
        if positions.is_empty() && orders.is_empty() {
            return Ok(PassOutcome::Idle);
        }

        let actions = Self::plan(&positions, &orders, prices);
        let mut report = PassReport::default();

        for action in actions {
            match self.execute(user_id, action).await? {
                Executed::Applied => report.applied.push(action),
                Executed::Stale => {
                    debug!(?action, "target already resolved");
                    report.stale.push(action);
                }
                Executed::Rejected => report.rejected.push(action),
            }
        }

        if !report.applied.is_empty() || !report.rejected.is_empty() {
            info!(
                applied = report.applied.len(),
                stale = report.stale.len(),
                rejected = report.rejected.len(),
                "monitor pass fired"
            );
        }
        Ok(PassOutcome::Evaluated(report))
    }

    // store failures propagate. everything else is classified so the pass can go on.
    async fn execute(&self, user_id: &UserId, action: MonitorAction) -> Result<Executed, LedgerError> {
        let outcome = match action {
            MonitorAction::Liquidate { position, price } => self
                .engine
                .liquidate_position(user_id, position, price)
                .await
                .map(|r| r.is_some()),
            MonitorAction::TakeProfit { position, price } | MonitorAction::StopLoss { position, price } => self
                .engine
                .close_position(user_id, position, price)
                .await
                .map(|_| true),
            MonitorAction::Fill { order, price } => self
                .engine
                .fill_order(user_id, order, price)
                .await
                .map(|r| r.is_some()),
        };

        match outcome {
            Ok(true) => Ok(Executed::Applied),
            Ok(false) => Ok(Executed::Stale),
            Err(e) if e.is_stale_target() => Ok(Executed::Stale),
            Err(LedgerError::Validation(e)) => {
                warn!(?action, error = %e, "monitor action rejected");
                Ok(Executed::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// 10.4: drives passes on every price update and on the configured interval until
    /// the feed's sender is dropped.
    pub async fn run(&self, user_id: UserId, mut prices: PriceFeedReceiver) {
        let mut ticker = tokio::time::interval(self.engine.config().monitor_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(user = %user_id, "position monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = prices.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let snapshot = prices.borrow_and_update().clone();
            match self.run_pass(&user_id, &snapshot).await {
                Ok(outcome) => debug!(?outcome, "pass done"),
                Err(e) => warn!(user = %user_id, error = %e, "monitor pass failed"),
            }
        }

        info!(user = %user_id, "price feed closed, position monitor stopped");
    }
}

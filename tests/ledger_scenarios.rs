//! End-to-end ledger scenarios against the in-memory store.
//!
//! Walks the documented lifecycle: market open, close, liquidation, limit fill,
//! cancel and reset, plus the error paths around them.

use paper_futures::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn engine() -> Arc<TradingEngine> {
    Arc::new(TradingEngine::new(Arc::new(MemoryStore::new()), LedgerConfig::default()))
}

fn alice() -> UserId {
    UserId::from("alice")
}

fn btc() -> Symbol {
    Symbol::new("BTCUSDT").unwrap()
}

fn px(v: Decimal) -> Price {
    Price::new_unchecked(v)
}

fn usdt(v: Decimal) -> Quote {
    Quote::new(v)
}

fn lev(v: u32) -> Leverage {
    Leverage::new(v).unwrap()
}

fn pow10(exp: u32) -> Decimal {
    Decimal::from_i128_with_scale(10i128.pow(exp), 0)
}

fn at(price: Decimal) -> PriceSnapshot {
    PriceSnapshot::new().with_price(btc(), px(price))
}

/// LONG MARKET 5000 USDT @ 50000, 10x.
async fn open_scenario_long(engine: &TradingEngine) -> Position {
    let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(5000)), lev(10));
    engine.open_position(&alice(), request).await.unwrap().position.unwrap()
}

/// LONG LIMIT 1000 USDT @ 48000, 5x.
async fn place_scenario_limit(engine: &TradingEngine) -> Order {
    let request = OpenPositionRequest::limit(btc(), Side::Long, px(dec!(48000)), usdt(dec!(1000)), lev(5));
    engine.open_position(&alice(), request).await.unwrap().order.unwrap()
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn fresh_account_gets_default_balance() {
        let engine = engine();
        let account = engine.get_or_create_account(&alice()).await.unwrap();
        assert_eq!(account.balance.value(), dec!(10000));
        assert_eq!(account.total_deposit.value(), dec!(10000));

        // repeat calls return the same row
        let again = engine.get_or_create_account(&alice()).await.unwrap();
        assert_eq!(again, account);
    }

    #[tokio::test]
    async fn scenario_1_market_open() {
        let engine = engine();
        let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(5000)), lev(10));
        let result = engine.open_position(&alice(), request).await.unwrap();

        let position = result.position.unwrap();
        assert!(result.order.is_none());
        assert_eq!(position.quantity, dec!(0.1));
        assert_eq!(position.margin.value(), dec!(500));
        assert_eq!(position.liq_price.value(), dec!(45200));
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(result.fee.value(), dec!(2));
        assert_eq!(result.account.balance.value(), dec!(9498));

        let trade = result.trade.unwrap();
        assert_eq!(trade.trade_type, TradeType::Open);
        assert_eq!(trade.pnl, Quote::zero());
        assert_eq!(trade.fee.value(), dec!(2));
        assert_eq!(trade.position_id, Some(position.id));

        // the returned account is what the store holds
        assert_eq!(engine.account(&alice()).await.unwrap(), result.account);
    }

    #[tokio::test]
    async fn cross_margin_widens_the_cushion() {
        let engine = engine();
        let request = OpenPositionRequest::market(btc(), Side::Short, px(dec!(50000)), usdt(dec!(50000)), lev(10))
            .with_margin_mode(MarginMode::Cross);
        let position = engine.open_position(&alice(), request).await.unwrap().position.unwrap();

        // free balance after the open is 4980, i.e. 0.0996 of notional on top of 1/10
        assert_eq!(position.margin_mode, MarginMode::Cross);
        assert_eq!(position.liq_price.value(), dec!(59780));
        assert!(position.liq_price.value() > dec!(54800));
    }

    #[tokio::test]
    async fn scenario_2_close_in_profit() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;

        let result = engine.close_position(&alice(), position.id, px(dec!(55000))).await.unwrap();
        assert_eq!(result.pnl.value(), dec!(500));
        assert_eq!(result.fee.value(), dec!(2.2));
        assert_eq!(result.account.balance.value(), dec!(10495.8));

        let closed = result.position;
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_price, Some(px(dec!(55000))));
        assert_eq!(closed.unrealized_pnl.value(), dec!(500));
        assert!(closed.closed_at.is_some());

        let trades = engine.trades(&alice(), None).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].trade_type, TradeType::Close);
        assert_eq!(trades[0].pnl.value(), dec!(500));
        assert_eq!(trades[1].trade_type, TradeType::Open);
    }

    #[tokio::test]
    async fn scenario_3_liquidation_forfeits_margin_in_place() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;

        let result = engine
            .liquidate_position(&alice(), position.id, px(dec!(45000)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.position.status, PositionStatus::Liquidated);
        assert_eq!(result.position.unrealized_pnl.value(), dec!(-500));
        assert_eq!(result.position.close_price, Some(px(dec!(45000))));
        assert_eq!(result.forfeited_margin.value(), dec!(500));

        let account = engine.account(&alice()).await.unwrap();
        assert_eq!(account.balance.value(), dec!(9498));

        let trades = engine.trades(&alice(), None).await.unwrap();
        assert_eq!(trades[0].trade_type, TradeType::Liquidation);
        assert_eq!(trades[0].pnl.value(), dec!(-500));
        assert_eq!(trades[0].fee, Quote::zero());
    }

    #[tokio::test]
    async fn scenario_4_limit_order_escrow_then_fill() {
        let engine = engine();
        let order = place_scenario_limit(&engine).await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.escrow.value(), dec!(200.4));
        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(9799.6));
        assert!(engine.open_positions(&alice()).await.unwrap().is_empty());

        let fill = engine
            .fill_order(&alice(), order.id, px(dec!(48000)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fill.order.status, OrderStatus::Filled);
        assert_eq!(fill.position.entry_price, px(dec!(48000)));
        assert_eq!(fill.position.quantity, order.quantity);
        assert_eq!(fill.position.margin.value(), dec!(200));
        assert_eq!(fill.true_up, Quote::zero());

        // a fill at the order price does not move the balance
        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(9799.6));
        assert!(engine.pending_orders(&alice()).await.unwrap().is_empty());
        assert_eq!(engine.open_positions(&alice()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scenario_5_cancel_refunds_escrow() {
        let engine = engine();
        let order = place_scenario_limit(&engine).await;

        let result = engine.cancel_order(&alice(), order.id).await.unwrap();
        assert_eq!(result.order.status, OrderStatus::Cancelled);
        assert_eq!(result.refunded.value(), dec!(200.4));
        assert_eq!(result.account.balance.value(), dec!(10000));
    }

    #[tokio::test]
    async fn scenario_6_reset_wipes_everything() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;
        let order = place_scenario_limit(&engine).await;

        let account = engine.reset_account(&alice()).await.unwrap();
        assert_eq!(account.balance.value(), dec!(10000));
        assert_eq!(account.total_deposit.value(), dec!(10000));

        assert!(engine.open_positions(&alice()).await.unwrap().is_empty());
        assert!(engine.pending_orders(&alice()).await.unwrap().is_empty());

        // closed without a settlement: no close price, pnl untouched, no extra trades
        let closed = engine.store().get_position(&alice(), position.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_price, None);
        assert_eq!(closed.unrealized_pnl, Quote::zero());

        let cancelled = engine.store().get_order(&alice(), order.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(engine.trades(&alice(), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn loss_beyond_margin_floors_balance_at_zero() {
        let engine = engine();
        // nearly the whole balance into a 100x long, then close far below entry
        let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(950000)), lev(100));
        let position = engine.open_position(&alice(), request).await.unwrap().position.unwrap();

        let result = engine.close_position(&alice(), position.id, px(dec!(40000))).await.unwrap();
        assert!(result.pnl.value() < dec!(-10000));
        assert_eq!(result.account.balance, Quote::zero());
    }
}

mod stop_orders {
    use super::*;

    #[tokio::test]
    async fn dearer_stop_fill_debits_the_difference() {
        let engine = engine();
        let request = OpenPositionRequest::stop_market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(1000)), lev(10));
        let order = engine.open_position(&alice(), request).await.unwrap().order.unwrap();
        assert_eq!(order.escrow.value(), dec!(100.4));

        let fill = engine
            .fill_order(&alice(), order.id, px(dec!(51000)))
            .await
            .unwrap()
            .unwrap();

        // 1020 notional at the fill: margin 102, fee 0.408
        assert_eq!(fill.position.margin.value(), dec!(102));
        assert_eq!(fill.true_up.value(), dec!(2.008));
        assert_eq!(fill.shortfall, Quote::zero());
        assert_eq!(fill.account.balance.value(), dec!(9897.592));
        assert_eq!(fill.position.entry_price, px(dec!(51000)));
    }

    #[tokio::test]
    async fn cheaper_stop_fill_refunds_the_excess() {
        let engine = engine();
        let request = OpenPositionRequest::stop_market(btc(), Side::Short, px(dec!(50000)), usdt(dec!(1000)), lev(10));
        let order = engine.open_position(&alice(), request).await.unwrap().order.unwrap();

        let fill = engine
            .fill_order(&alice(), order.id, px(dec!(49000)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fill.position.margin.value(), dec!(98));
        assert_eq!(fill.true_up.value(), dec!(-2.008));
        assert_eq!(fill.account.balance.value(), dec!(9901.608));
    }

    #[tokio::test]
    async fn filled_position_keeps_order_exits() {
        let engine = engine();
        let request = OpenPositionRequest::limit(btc(), Side::Long, px(dec!(48000)), usdt(dec!(1000)), lev(5))
            .with_take_profit(px(dec!(52000)))
            .with_stop_loss(px(dec!(46000)));
        let order = engine.open_position(&alice(), request).await.unwrap().order.unwrap();

        let fill = engine
            .fill_order(&alice(), order.id, px(dec!(48000)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fill.position.tp_price, Some(px(dec!(52000))));
        assert_eq!(fill.position.sl_price, Some(px(dec!(46000))));
        assert_eq!(fill.position.leverage, lev(5));
    }
}

mod terminal_states {
    use super::*;

    #[tokio::test]
    async fn second_close_is_rejected_without_double_credit() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;
        engine.close_position(&alice(), position.id, px(dec!(55000))).await.unwrap();

        let err = engine
            .close_position(&alice(), position.id, px(dec!(55000)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PositionNotOpen { .. }));
        assert_eq!(err.user_message(), "Position is already closed");
        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(10495.8));
    }

    #[tokio::test]
    async fn second_liquidation_is_a_silent_no_op() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;

        assert!(engine.liquidate_position(&alice(), position.id, px(dec!(45000))).await.unwrap().is_some());
        assert!(engine.liquidate_position(&alice(), position.id, px(dec!(45000))).await.unwrap().is_none());
        assert_eq!(engine.trades(&alice(), None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn liquidating_a_closed_position_is_a_no_op() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;
        engine.close_position(&alice(), position.id, px(dec!(50000))).await.unwrap();

        let result = engine.liquidate_position(&alice(), position.id, px(dec!(45000))).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn second_fill_is_a_silent_no_op() {
        let engine = engine();
        let order = place_scenario_limit(&engine).await;

        assert!(engine.fill_order(&alice(), order.id, px(dec!(48000))).await.unwrap().is_some());
        assert!(engine.fill_order(&alice(), order.id, px(dec!(48000))).await.unwrap().is_none());
        assert_eq!(engine.open_positions(&alice()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_cancel_is_rejected_without_double_refund() {
        let engine = engine();
        let order = place_scenario_limit(&engine).await;
        engine.cancel_order(&alice(), order.id).await.unwrap();

        let err = engine.cancel_order(&alice(), order.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::OrderNotPending { .. }));
        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(10000));
    }

    #[tokio::test]
    async fn filled_orders_cannot_be_cancelled() {
        let engine = engine();
        let order = place_scenario_limit(&engine).await;
        engine.fill_order(&alice(), order.id, px(dec!(48000))).await.unwrap();

        let err = engine.cancel_order(&alice(), order.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::OrderNotPending { status: OrderStatus::Filled, .. }));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let engine = engine();
        let close = engine.close_position(&alice(), PositionId(999), px(dec!(1))).await.unwrap_err();
        assert!(matches!(close, LedgerError::PositionNotFound(PositionId(999))));

        let cancel = engine.cancel_order(&alice(), OrderId(999)).await.unwrap_err();
        assert!(matches!(cancel, LedgerError::OrderNotFound(OrderId(999))));

        assert!(engine.fill_order(&alice(), OrderId(999), px(dec!(1))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_users_rows_are_invisible() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;
        let bob = UserId::from("bob");

        let err = engine.close_position(&bob, position.id, px(dec!(55000))).await.unwrap_err();
        assert!(matches!(err, LedgerError::PositionNotFound(_)));
        assert!(engine.open_positions(&bob).await.unwrap().is_empty());
        assert_eq!(engine.open_positions(&alice()).await.unwrap().len(), 1);
    }
}

mod rejections {
    use super::*;

    #[tokio::test]
    async fn insufficient_balance_is_a_full_no_op() {
        let engine = engine();
        let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(200000)), lev(10));

        let err = engine.open_position(&alice(), request).await.unwrap_err();
        match &err {
            LedgerError::InsufficientBalance { required, available } => {
                assert_eq!(required.value(), dec!(20080));
                assert_eq!(available.value(), dec!(10000));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            err.user_message(),
            "Not enough balance: need 20080.00 USDT, have 10000.00 USDT"
        );

        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(10000));
        assert!(engine.open_positions(&alice()).await.unwrap().is_empty());
        assert!(engine.trades(&alice(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_orders_also_need_the_balance() {
        let engine = engine();
        let request = OpenPositionRequest::limit(btc(), Side::Short, px(dec!(60000)), usdt(dec!(100000)), lev(5));
        let err = engine.open_position(&alice(), request).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert!(engine.pending_orders(&alice()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn leverage_above_config_max_is_rejected() {
        let engine = Arc::new(TradingEngine::new(Arc::new(MemoryStore::new()), LedgerConfig::conservative()));
        let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(1000)), lev(50));

        let err = engine.open_position(&alice(), request).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::LeverageTooHigh { max: 20, .. })
        ));
    }

    #[tokio::test]
    async fn non_positive_size_is_rejected() {
        let engine = engine();
        let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), Quote::zero(), lev(10));
        let err = engine.open_position(&alice(), request).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::NonPositiveSize(_))));
    }

    #[tokio::test]
    async fn exits_on_the_wrong_side_are_rejected() {
        let engine = engine();
        let long_tp_below = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(1000)), lev(10))
            .with_take_profit(px(dec!(49000)));
        let err = engine.open_position(&alice(), long_tp_below).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::TakeProfitWrongSide { .. })));

        // for pending orders the reference is the order price
        let short_sl_below = OpenPositionRequest::limit(btc(), Side::Short, px(dec!(52000)), usdt(dec!(1000)), lev(10))
            .with_stop_loss(px(dec!(51000)));
        let err = engine.open_position(&alice(), short_sl_below).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::StopLossWrongSide { .. })));

        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(10000));
    }

    #[tokio::test]
    async fn sizes_past_decimal_range_are_rejected_not_fatal() {
        let engine = engine();
        let huge = OpenPositionRequest::market(btc(), Side::Long, px(dec!(0.01)), usdt(pow10(28)), lev(1));
        let err = engine.open_position(&alice(), huge).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::AmountOutOfRange(_))));

        // representable but unaffordable is still a balance problem
        let big = OpenPositionRequest::market(btc(), Side::Long, px(dec!(1)), usdt(pow10(28)), lev(1));
        let err = engine.open_position(&alice(), big).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(10000));
        assert!(engine.open_positions(&alice()).await.unwrap().is_empty());
        assert!(engine.trades(&alice(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_outside_decimal_range_keeps_position_open() {
        let engine = engine();
        let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(0.00001)), usdt(dec!(1000)), lev(1));
        let position = engine.open_position(&alice(), request).await.unwrap().position.unwrap();
        assert_eq!(position.quantity, dec!(100000000));

        let err = engine
            .close_position(&alice(), position.id, px(pow10(21)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::AmountOutOfRange(_))));

        let stored = engine.store().get_position(&alice(), position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Open);
        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(8999.6));
        assert_eq!(engine.trades(&alice(), None).await.unwrap().len(), 1);

        // an ordinary price still settles it
        let closed = engine.close_position(&alice(), position.id, px(dec!(0.00002))).await.unwrap();
        assert_eq!(closed.pnl.value(), dec!(1000));
    }

    #[tokio::test]
    async fn stop_fill_outside_decimal_range_leaves_order_pending() {
        let engine = engine();
        let request = OpenPositionRequest::stop_market(btc(), Side::Long, px(dec!(0.0001)), usdt(dec!(1000)), lev(1));
        let order = engine.open_position(&alice(), request).await.unwrap().order.unwrap();

        let err = engine
            .fill_order(&alice(), order.id, px(pow10(26)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::AmountOutOfRange(_))));
        assert_eq!(engine.pending_orders(&alice()).await.unwrap().len(), 1);
        assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(8999.6));
    }
}

mod exits {
    use super::*;

    #[tokio::test]
    async fn update_tp_sl_sets_and_clears() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;

        let updated = engine
            .update_tp_sl(&alice(), position.id, Some(px(dec!(56000))), Some(px(dec!(47000))))
            .await
            .unwrap();
        assert_eq!(updated.tp_price, Some(px(dec!(56000))));
        assert_eq!(updated.sl_price, Some(px(dec!(47000))));

        let cleared = engine.update_tp_sl(&alice(), position.id, None, None).await.unwrap();
        assert_eq!(cleared.tp_price, None);
        assert_eq!(cleared.sl_price, None);

        let stored = engine.store().get_position(&alice(), position.id).await.unwrap().unwrap();
        assert_eq!(stored, cleared);
    }

    #[tokio::test]
    async fn update_tp_sl_validates_against_entry() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;

        let err = engine
            .update_tp_sl(&alice(), position.id, None, Some(px(dec!(51000))))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::StopLossWrongSide { .. })));
    }

    #[tokio::test]
    async fn update_tp_sl_on_closed_position_fails() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;
        engine.close_position(&alice(), position.id, px(dec!(50000))).await.unwrap();

        let err = engine.update_tp_sl(&alice(), position.id, None, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::PositionNotOpen { .. }));
    }
}

mod read_models {
    use super::*;

    #[tokio::test]
    async fn summary_marks_positions_to_market() {
        let engine = engine();
        open_scenario_long(&engine).await;
        place_scenario_limit(&engine).await;

        let summary = engine.summary(&alice(), &at(dec!(55000))).await.unwrap();
        assert_eq!(summary.balance.value(), dec!(9297.6));
        assert_eq!(summary.margin_in_use.value(), dec!(500));
        assert_eq!(summary.escrowed_in_orders.value(), dec!(200.4));
        assert_eq!(summary.total_unrealized_pnl.value(), dec!(500));
        assert_eq!(summary.equity.value(), dec!(10498));
        assert_eq!(summary.roe, dec!(4.98));
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.pending_orders, 1);
    }

    #[tokio::test]
    async fn unpriced_positions_contribute_no_pnl() {
        let engine = engine();
        open_scenario_long(&engine).await;

        let summary = engine.summary(&alice(), &PriceSnapshot::new()).await.unwrap();
        assert_eq!(summary.total_unrealized_pnl, Quote::zero());
        assert_eq!(summary.equity.value(), dec!(9998));
    }

    #[tokio::test]
    async fn trade_history_respects_limit() {
        let engine = engine();
        for _ in 0..3 {
            let position = open_scenario_long(&engine).await;
            engine.close_position(&alice(), position.id, px(dec!(50000))).await.unwrap();
        }

        assert_eq!(engine.trades(&alice(), None).await.unwrap().len(), 6);
        let latest = engine.trades(&alice(), Some(2)).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].trade_type, TradeType::Close);
        assert!(latest[0].id > latest[1].id);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_opens_never_lose_a_debit() {
        let engine = engine();
        let mut tasks = Vec::new();

        for _ in 0..20 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let request = OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), usdt(dec!(1000)), lev(10));
                engine.open_position(&alice(), request).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // 20 * (100 margin + 0.4 fee)
        let account = engine.account(&alice()).await.unwrap();
        assert_eq!(account.balance.value(), dec!(7992));
        assert_eq!(engine.open_positions(&alice()).await.unwrap().len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_and_liquidate_race_settles_once() {
        let engine = engine();
        let position = open_scenario_long(&engine).await;

        let closer = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.close_position(&alice(), position.id, px(dec!(50000))).await })
        };
        let liquidator = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.liquidate_position(&alice(), position.id, px(dec!(45000))).await })
        };

        let closed = closer.await.unwrap();
        let liquidated = liquidator.await.unwrap().unwrap();

        let balance = engine.account(&alice()).await.unwrap().balance.value();
        match (closed, liquidated) {
            // close won: margin back minus the 2 USDT close fee
            (Ok(_), None) => assert_eq!(balance, dec!(9996)),
            // liquidation won: margin forfeited, close sees a resolved position
            (Err(LedgerError::PositionNotOpen { .. }), Some(_)) => assert_eq!(balance, dec!(9498)),
            other => panic!("both or neither settled: {other:?}"),
        }
        assert_eq!(engine.trades(&alice(), None).await.unwrap().len(), 2);
    }
}

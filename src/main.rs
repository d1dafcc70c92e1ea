//! Paper futures ledger simulation.
//!
//! Walks the ledger through its lifecycle on an in-memory store: market opens and
//! closes, liquidation by the position monitor, limit order fills and cancels, and a
//! full account reset. Set `RUST_LOG=paper_futures=debug` to watch the monitor decide.

use paper_futures::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type SimResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() -> SimResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Paper Futures Ledger Simulation");
    println!("Default config, in-memory store\n");

    scenario_1_market_open().await?;
    scenario_2_profitable_close().await?;
    scenario_3_liquidation().await?;
    scenario_4_limit_fill().await?;
    scenario_5_cancel_order().await?;
    scenario_6_reset().await?;
    scenario_7_live_monitor().await?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn new_engine() -> Arc<TradingEngine> {
    Arc::new(TradingEngine::new(Arc::new(MemoryStore::new()), LedgerConfig::default()))
}

fn btc() -> Result<Symbol, Box<dyn Error>> {
    Ok(Symbol::new("BTCUSDT").ok_or("invalid symbol")?)
}

fn px(value: Decimal) -> Price {
    Price::new_unchecked(value)
}

fn lev(value: u32) -> Result<Leverage, Box<dyn Error>> {
    Ok(Leverage::new(value).ok_or("invalid leverage")?)
}

async fn open_btc_long(engine: &TradingEngine, user: &UserId) -> Result<Position, Box<dyn Error>> {
    let request = OpenPositionRequest::market(btc()?, Side::Long, px(dec!(50000)), Quote::new(dec!(5000)), lev(10)?);
    let result = engine.open_position(user, request).await?;
    Ok(result.position.ok_or("market open returned no position")?)
}

/// MARKET long, 5000 USDT at 10x.
async fn scenario_1_market_open() -> SimResult {
    println!("Scenario 1: Market Open\n");

    let engine = new_engine();
    let alice = UserId::from("alice");

    let account = engine.get_or_create_account(&alice).await?;
    println!("  Fresh account: balance {}, deposit {}", account.balance, account.total_deposit);

    let position = open_btc_long(&engine, &alice).await?;
    let account = engine.account(&alice).await?;

    println!("  LONG 0.1 BTC @ $50,000, 10x");
    println!("  Quantity: {}, margin: {}", position.quantity, position.margin);
    println!("  Liquidation price: ${}", position.liq_price);
    println!("  Balance after margin + fee: {}\n", account.balance);
    Ok(())
}

/// Close the scenario 1 long after a move to 55000.
async fn scenario_2_profitable_close() -> SimResult {
    println!("Scenario 2: Close In Profit\n");

    let engine = new_engine();
    let alice = UserId::from("alice");
    let position = open_btc_long(&engine, &alice).await?;

    let result = engine.close_position(&alice, position.id, px(dec!(55000))).await?;

    println!("  Price moves to $55,000, close");
    println!("  PnL: {}, close fee: {}", result.pnl, result.fee);
    println!("  Balance: {}\n", result.account.balance);
    Ok(())
}

/// Price falls through the liquidation price; the monitor forfeits the margin.
async fn scenario_3_liquidation() -> SimResult {
    println!("Scenario 3: Liquidation\n");

    let engine = new_engine();
    let monitor = PositionMonitor::new(engine.clone());
    let alice = UserId::from("alice");
    let position = open_btc_long(&engine, &alice).await?;

    let prices = PriceSnapshot::new().with_price(btc()?, px(dec!(45000)));
    let outcome = monitor.run_pass(&alice, &prices).await?;

    println!("  Price drops to $45,000 (liq ${})", position.liq_price);
    println!("  Monitor pass: {:?}", outcome);

    let trades = engine.trades(&alice, None).await?;
    if let Some(last) = trades.first() {
        println!("  Last trade: {:?} @ {}, pnl {}", last.trade_type, last.price, last.pnl);
    }
    println!("  Balance: {} (margin forfeited in place)\n", engine.account(&alice).await?.balance);
    Ok(())
}

/// LIMIT long at 48000 rests, then fills when the market trades down to it.
async fn scenario_4_limit_fill() -> SimResult {
    println!("Scenario 4: Limit Order Fill\n");

    let engine = new_engine();
    let monitor = PositionMonitor::new(engine.clone());
    let alice = UserId::from("alice");

    let request = OpenPositionRequest::limit(btc()?, Side::Long, px(dec!(48000)), Quote::new(dec!(1000)), lev(5)?);
    let placed = engine.open_position(&alice, request).await?;

    println!("  LIMIT LONG 1000 USDT @ $48,000, 5x");
    println!("  Escrowed: {}, balance: {}", placed.order.map(|o| o.escrow).unwrap_or_default(), placed.account.balance);

    let quiet = PriceSnapshot::new().with_price(btc()?, px(dec!(49500)));
    println!("  @ $49,500: {:?}", monitor.run_pass(&alice, &quiet).await?);

    let touch = PriceSnapshot::new().with_price(btc()?, px(dec!(48000)));
    println!("  @ $48,000: {:?}", monitor.run_pass(&alice, &touch).await?);

    for position in engine.open_positions(&alice).await? {
        println!("  Position {} entry ${}, margin {}", position.id, position.entry_price, position.margin);
    }
    println!("  Balance: {}\n", engine.account(&alice).await?.balance);
    Ok(())
}

/// Cancel the scenario 4 order before it fills.
async fn scenario_5_cancel_order() -> SimResult {
    println!("Scenario 5: Cancel Order\n");

    let engine = new_engine();
    let alice = UserId::from("alice");

    let request = OpenPositionRequest::limit(btc()?, Side::Long, px(dec!(48000)), Quote::new(dec!(1000)), lev(5)?);
    let placed = engine.open_position(&alice, request).await?;
    let order = placed.order.ok_or("limit open returned no order")?;

    let result = engine.cancel_order(&alice, order.id).await?;
    println!("  Refunded: {}, balance: {}", result.refunded, result.account.balance);

    match engine.cancel_order(&alice, order.id).await {
        Err(e) => println!("  Second cancel: {}\n", e.user_message()),
        Ok(_) => println!("  Second cancel unexpectedly succeeded\n"),
    }
    Ok(())
}

/// Start over from a messy account.
async fn scenario_6_reset() -> SimResult {
    println!("Scenario 6: Reset\n");

    let engine = new_engine();
    let alice = UserId::from("alice");

    open_btc_long(&engine, &alice).await?;
    let request = OpenPositionRequest::limit(btc()?, Side::Short, px(dec!(52000)), Quote::new(dec!(2000)), lev(20)?);
    engine.open_position(&alice, request).await?;

    let before = engine.summary(&alice, &PriceSnapshot::new()).await?;
    println!("  Before: balance {}, {} positions, {} orders", before.balance, before.open_positions, before.pending_orders);

    let account = engine.reset_account(&alice).await?;
    let after = engine.summary(&alice, &PriceSnapshot::new()).await?;
    println!("  After: balance {}, {} positions, {} orders\n", account.balance, after.open_positions, after.pending_orders);
    Ok(())
}

/// Monitor loop fed by a price feed, with a take profit hit along the way.
async fn scenario_7_live_monitor() -> SimResult {
    println!("Scenario 7: Live Monitor\n");

    let engine = new_engine();
    let monitor = Arc::new(PositionMonitor::new(engine.clone()));
    let alice = UserId::from("alice");

    let request = OpenPositionRequest::market(btc()?, Side::Short, px(dec!(50000)), Quote::new(dec!(3000)), lev(20)?)
        .with_take_profit(px(dec!(48500)))
        .with_stop_loss(px(dec!(51000)));
    engine.open_position(&alice, request).await?;

    let feed = PriceFeed::new();
    let task = {
        let monitor = monitor.clone();
        let rx = feed.subscribe();
        let user = alice.clone();
        tokio::spawn(async move { monitor.run(user, rx).await })
    };

    for price in [dec!(49800), dec!(49200), dec!(48400)] {
        feed.update(btc()?, px(price));
        println!("  Tick ${}", price);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    drop(feed);
    task.await?;

    let summary = engine.summary(&alice, &PriceSnapshot::new()).await?;
    println!("  Open positions: {}, balance {}, roe {:.2}%", summary.open_positions, summary.balance, summary.roe);
    Ok(())
}

//! A failing commit must leave the ledger exactly as it was.

use async_trait::async_trait;
use paper_futures::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory store whose commits can be switched off, like a backend going away mid-operation.
struct FlakyStore {
    inner: MemoryStore,
    fail_commits: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_commits: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.fail_commits.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>, StoreError> {
        self.inner.get_account(user_id).await
    }

    async fn insert_account(&self, account: &Account) -> Result<bool, StoreError> {
        self.inner.insert_account(account).await
    }

    async fn get_position(&self, user_id: &UserId, id: PositionId) -> Result<Option<Position>, StoreError> {
        self.inner.get_position(user_id, id).await
    }

    async fn get_order(&self, user_id: &UserId, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.inner.get_order(user_id, id).await
    }

    async fn list_positions(&self, user_id: &UserId, status: PositionStatus) -> Result<Vec<Position>, StoreError> {
        self.inner.list_positions(user_id, status).await
    }

    async fn list_orders(&self, user_id: &UserId, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        self.inner.list_orders(user_id, status).await
    }

    async fn list_trades(&self, user_id: &UserId, limit: usize) -> Result<Vec<Trade>, StoreError> {
        self.inner.list_trades(user_id, limit).await
    }

    async fn next_id(&self) -> Result<u64, StoreError> {
        self.inner.next_id().await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.commit(batch).await
    }
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

fn setup() -> (Arc<FlakyStore>, TradingEngine) {
    let store = Arc::new(FlakyStore::new());
    let engine = TradingEngine::new(store.clone(), LedgerConfig::default());
    (store, engine)
}

fn market_long() -> OpenPositionRequest {
    OpenPositionRequest::market(btc(), Side::Long, px(dec!(50000)), Quote::new(dec!(5000)), Leverage::new(10).unwrap())
}

#[tokio::test]
async fn failed_open_leaves_no_position_trade_or_debit() {
    let (store, engine) = setup();
    engine.get_or_create_account(&alice()).await.unwrap();

    store.set_failing(true);
    let err = engine.open_position(&alice(), market_long()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Store(StoreError::Unavailable(_))));
    assert_eq!(err.user_message(), "Trading is temporarily unavailable, try again");
    store.set_failing(false);

    assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(10000));
    assert!(engine.open_positions(&alice()).await.unwrap().is_empty());
    assert!(engine.trades(&alice(), None).await.unwrap().is_empty());
    // only the account row exists
    assert_eq!(store.inner.row_count().await, 1);
}

#[tokio::test]
async fn failed_close_keeps_position_open_and_balance_untouched() {
    let (store, engine) = setup();
    let position = engine.open_position(&alice(), market_long()).await.unwrap().position.unwrap();

    store.set_failing(true);
    assert!(engine.close_position(&alice(), position.id, px(dec!(55000))).await.is_err());
    store.set_failing(false);

    let stored = engine.store().get_position(&alice(), position.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Open);
    assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(9498));
    assert_eq!(engine.trades(&alice(), None).await.unwrap().len(), 1);

    // no retry happened, and the close still works once the store is back
    let result = engine.close_position(&alice(), position.id, px(dec!(55000))).await.unwrap();
    assert_eq!(result.account.balance.value(), dec!(10495.8));
}

#[tokio::test]
async fn failed_cancel_keeps_order_and_escrow() {
    let (store, engine) = setup();
    let request = OpenPositionRequest::limit(btc(), Side::Long, px(dec!(48000)), Quote::new(dec!(1000)), Leverage::new(5).unwrap());
    let order = engine.open_position(&alice(), request).await.unwrap().order.unwrap();

    store.set_failing(true);
    assert!(engine.cancel_order(&alice(), order.id).await.is_err());
    store.set_failing(false);

    assert_eq!(engine.pending_orders(&alice()).await.unwrap().len(), 1);
    assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(9799.6));
}

#[tokio::test]
async fn failed_reset_changes_nothing() {
    let (store, engine) = setup();
    engine.open_position(&alice(), market_long()).await.unwrap();

    store.set_failing(true);
    assert!(engine.reset_account(&alice()).await.is_err());
    store.set_failing(false);

    assert_eq!(engine.open_positions(&alice()).await.unwrap().len(), 1);
    assert_eq!(engine.account(&alice()).await.unwrap().balance.value(), dec!(9498));
}

#[tokio::test]
async fn stale_account_write_is_rejected() {
    let store = MemoryStore::new();
    let account = Account::new(alice(), Quote::new(dec!(10000)), Timestamp::from_millis(0));
    assert!(store.insert_account(&account).await.unwrap());

    // a writer that read version 0 and one that read it too
    let mut first = account.clone();
    first.balance = Quote::new(dec!(9000));
    first.touch(Timestamp::from_millis(1));
    let mut second = account.clone();
    second.balance = Quote::new(dec!(8000));
    second.touch(Timestamp::from_millis(1));

    let mut batch = WriteBatch::new(alice());
    batch.put_account(first);
    store.commit(batch).await.unwrap();

    let mut batch = WriteBatch::new(alice());
    batch.put_account(second);
    let err = store.commit(batch).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { table: Table::Accounts, .. }));

    let stored = store.get_account(&alice()).await.unwrap().unwrap();
    assert_eq!(stored.balance.value(), dec!(9000));
}

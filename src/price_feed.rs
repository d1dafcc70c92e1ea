// Price Feed Integration
//
// The ledger never fetches prices itself. Whatever ticker the host runs (exchange
// websocket, REST poller, replay file) publishes symbol → last price snapshots into a
// PriceFeed, and the position monitor reads the latest snapshot. A snapshot may be
// missing symbols; consumers skip what they cannot price.

use crate::types::{Price, Symbol, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;

/// Point-in-time view of last traded prices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    prices: HashMap<Symbol, Price>,
    pub updated_at: Option<Timestamp>,
}

impl PriceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: Symbol, price: Price) -> Self {
        self.set(symbol, price);
        self
    }

    pub fn set(&mut self, symbol: Symbol, price: Price) {
        self.prices.insert(symbol, price);
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Price> {
        self.prices.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.prices.keys()
    }
}

impl FromIterator<(Symbol, Price)> for PriceSnapshot {
    fn from_iter<I: IntoIterator<Item = (Symbol, Price)>>(iter: I) -> Self {
        Self {
            prices: iter.into_iter().collect(),
            updated_at: None,
        }
    }
}

pub type PriceFeedReceiver = watch::Receiver<PriceSnapshot>;

/// Publishing side of the feed. Dropping it ends every subscribed monitor loop.
#[derive(Debug)]
pub struct PriceFeed {
    tx: watch::Sender<PriceSnapshot>,
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PriceSnapshot::new());
        Self { tx }
    }

    pub fn subscribe(&self) -> PriceFeedReceiver {
        self.tx.subscribe()
    }

    /// Merges a single tick into the current snapshot and wakes subscribers.
    pub fn update(&self, symbol: Symbol, price: Price) {
        self.tx.send_modify(|snapshot| {
            snapshot.set(symbol, price);
            snapshot.updated_at = Some(Timestamp::now());
        });
    }

    /// Replaces the whole snapshot, e.g. after a reconnect.
    pub fn publish(&self, mut snapshot: PriceSnapshot) {
        snapshot.updated_at = Some(Timestamp::now());
        self.tx.send_replace(snapshot);
    }

    pub fn latest(&self) -> PriceSnapshot {
        self.tx.borrow().clone()
    }
}

//! Account and balance management.
//!
//! One account per user. `balance` is free, uncommitted funds: margin for open
//! positions and escrow for pending orders has already been taken out of it.
//! `total_deposit` is the baseline that account-level ROE is measured against.

use crate::types::{Quote, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Quote,
    pub total_deposit: Quote,
    // optimistic concurrency token. bumped on every committed balance write.
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Account {
    pub fn new(user_id: UserId, starting_balance: Quote, timestamp: Timestamp) -> Self {
        Self {
            user_id,
            balance: starting_balance,
            total_deposit: starting_balance,
            version: 0,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn can_afford(&self, amount: Quote) -> bool {
        self.balance >= amount
    }

    /// Takes `amount` out of the free balance. Full no-op on failure.
    pub fn reserve(&mut self, amount: Quote) -> Result<(), AccountError> {
        if !self.can_afford(amount) {
            return Err(AccountError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }
        self.balance = self.balance.sub(amount);
        Ok(())
    }

    /// Adds a settlement amount. A loss deeper than the balance floors at zero.
    pub fn settle(&mut self, amount: Quote) {
        let balance = self.balance.value().saturating_add(amount.value());
        self.balance = Quote::new(balance).floor_zero();
    }

    /// Debits up to `amount`, returning what could not be covered.
    pub fn debit_capped(&mut self, amount: Quote) -> Quote {
        let taken = amount.min(self.balance);
        self.balance = self.balance.sub(taken);
        amount.sub(taken)
    }

    pub fn reset(&mut self, starting_balance: Quote) {
        self.balance = starting_balance;
        self.total_deposit = starting_balance;
    }

    /// Marks the row as modified. The store checks the version on commit.
    pub fn touch(&mut self, timestamp: Timestamp) {
        self.version += 1;
        self.updated_at = timestamp;
    }
}

/// Derived read model for the UI: balances plus live PnL.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub balance: Quote,
    pub total_deposit: Quote,
    pub margin_in_use: Quote,
    pub escrowed_in_orders: Quote,
    pub total_unrealized_pnl: Quote,
    pub equity: Quote,
    pub roe: Decimal,
    pub open_positions: usize,
    pub pending_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Quote, available: Quote },
}

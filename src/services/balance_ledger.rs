use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Balance, BalanceChange, BalanceChangeKind};

#[derive(Debug, Error)]
pub enum BalanceLedgerError {
    #[error("insufficient free balance for {address}: have {available}, need {requested}")]
    InsufficientFree {
        address: String,
        available: Decimal,
        requested: Decimal,
    },
    #[error("insufficient locked balance for {address}: have {locked}, need {requested}")]
    InsufficientLocked {
        address: String,
        locked: Decimal,
        requested: Decimal,
    },
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// One entry per address: the live balance plus its mutex, guarding the read-modify-write of
/// `free`/`locked` so concurrent order submissions against the same address serialize.
struct Account {
    balance: Mutex<Balance>,
}

/// In-memory balance ledger with an append-only change log. Lock ordering across the engine is
/// always address before market: callers must never hold a market/orderbook lock while entering
/// a balance mutation.
pub struct BalanceLedger {
    accounts: DashMap<String, Arc<Account>>,
    changes: Mutex<Vec<BalanceChange>>,
}

impl BalanceLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accounts: DashMap::new(),
            changes: Mutex::new(Vec::new()),
        })
    }

    fn account(&self, address: &str) -> Arc<Account> {
        self.accounts
            .entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(Account {
                    balance: Mutex::new(Balance::new(address)),
                })
            })
            .clone()
    }

    pub fn get(&self, address: &str) -> Balance {
        self.account(address).balance.lock().clone()
    }

    fn record(&self, change: BalanceChange) {
        self.changes.lock().push(change);
    }

    /// Credits `amount` to `free`, e.g. a faucet grant or a realized profit.
    pub fn credit(&self, address: &str, amount: Decimal, reason: &str, reference_id: &str) -> Result<Balance, BalanceLedgerError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceLedgerError::NonPositiveAmount(amount));
        }
        let account = self.account(address);
        let mut balance = account.balance.lock();
        balance.free += amount;
        balance.total_credits += amount;
        balance.updated_at = chrono::Utc::now();
        let snapshot = balance.clone();
        drop(balance);
        self.record(BalanceChange {
            id: Uuid::new_v4(),
            address: address.to_string(),
            kind: BalanceChangeKind::Credit,
            amount,
            reason: reason.to_string(),
            reference_id: reference_id.to_string(),
            free_after: snapshot.free,
            locked_after: snapshot.locked,
            created_at: snapshot.updated_at,
        });
        Ok(snapshot)
    }

    /// Debits `amount` from `free`, e.g. a realized loss applied at fill time.
    pub fn debit(&self, address: &str, amount: Decimal, reason: &str, reference_id: &str) -> Result<Balance, BalanceLedgerError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceLedgerError::NonPositiveAmount(amount));
        }
        let account = self.account(address);
        let mut balance = account.balance.lock();
        if balance.free < amount {
            return Err(BalanceLedgerError::InsufficientFree {
                address: address.to_string(),
                available: balance.free,
                requested: amount,
            });
        }
        balance.free -= amount;
        balance.total_debits += amount;
        balance.updated_at = chrono::Utc::now();
        let snapshot = balance.clone();
        drop(balance);
        self.record(BalanceChange {
            id: Uuid::new_v4(),
            address: address.to_string(),
            kind: BalanceChangeKind::Debit,
            amount,
            reason: reason.to_string(),
            reference_id: reference_id.to_string(),
            free_after: snapshot.free,
            locked_after: snapshot.locked,
            created_at: snapshot.updated_at,
        });
        Ok(snapshot)
    }

    /// Moves `amount` from `free` into `locked`, e.g. margin reservation at order placement.
    pub fn lock(&self, address: &str, amount: Decimal, reason: &str, reference_id: &str) -> Result<Balance, BalanceLedgerError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceLedgerError::NonPositiveAmount(amount));
        }
        let account = self.account(address);
        let mut balance = account.balance.lock();
        if balance.free < amount {
            return Err(BalanceLedgerError::InsufficientFree {
                address: address.to_string(),
                available: balance.free,
                requested: amount,
            });
        }
        balance.free -= amount;
        balance.locked += amount;
        balance.updated_at = chrono::Utc::now();
        let snapshot = balance.clone();
        drop(balance);
        self.record(BalanceChange {
            id: Uuid::new_v4(),
            address: address.to_string(),
            kind: BalanceChangeKind::Lock,
            amount,
            reason: reason.to_string(),
            reference_id: reference_id.to_string(),
            free_after: snapshot.free,
            locked_after: snapshot.locked,
            created_at: snapshot.updated_at,
        });
        Ok(snapshot)
    }

    /// Moves `amount` from `locked` back into `free`, e.g. releasing margin on cancel or close.
    pub fn unlock(&self, address: &str, amount: Decimal, reason: &str, reference_id: &str) -> Result<Balance, BalanceLedgerError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceLedgerError::NonPositiveAmount(amount));
        }
        let account = self.account(address);
        let mut balance = account.balance.lock();
        if balance.locked < amount {
            return Err(BalanceLedgerError::InsufficientLocked {
                address: address.to_string(),
                locked: balance.locked,
                requested: amount,
            });
        }
        balance.locked -= amount;
        balance.free += amount;
        balance.updated_at = chrono::Utc::now();
        let snapshot = balance.clone();
        drop(balance);
        self.record(BalanceChange {
            id: Uuid::new_v4(),
            address: address.to_string(),
            kind: BalanceChangeKind::Unlock,
            amount,
            reason: reason.to_string(),
            reference_id: reference_id.to_string(),
            free_after: snapshot.free,
            locked_after: snapshot.locked,
            created_at: snapshot.updated_at,
        });
        Ok(snapshot)
    }

    /// Removes `amount` from `locked` without returning it to `free`, e.g. margin seized on
    /// liquidation. Unlike `debit`, draws from `locked`, not `free`.
    pub fn forfeit(&self, address: &str, amount: Decimal, reason: &str, reference_id: &str) -> Result<Balance, BalanceLedgerError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceLedgerError::NonPositiveAmount(amount));
        }
        let account = self.account(address);
        let mut balance = account.balance.lock();
        if balance.locked < amount {
            return Err(BalanceLedgerError::InsufficientLocked {
                address: address.to_string(),
                locked: balance.locked,
                requested: amount,
            });
        }
        balance.locked -= amount;
        balance.total_debits += amount;
        balance.updated_at = chrono::Utc::now();
        let snapshot = balance.clone();
        drop(balance);
        self.record(BalanceChange {
            id: Uuid::new_v4(),
            address: address.to_string(),
            kind: BalanceChangeKind::Debit,
            amount,
            reason: reason.to_string(),
            reference_id: reference_id.to_string(),
            free_after: snapshot.free,
            locked_after: snapshot.locked,
            created_at: snapshot.updated_at,
        });
        Ok(snapshot)
    }

    pub fn history(&self, address: &str) -> Vec<BalanceChange> {
        self.changes
            .lock()
            .iter()
            .filter(|c| c.address == address)
            .cloned()
            .collect()
    }

    /// Takes every change recorded since the last call, for a persistence worker to append to
    /// the durable log. The in-memory log keeps growing regardless (`history()` still needs it).
    pub fn drain_new_changes(&self, cursor: &mut usize) -> Vec<BalanceChange> {
        let changes = self.changes.lock();
        let new = changes[*cursor..].to_vec();
        *cursor = changes.len();
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn credit_then_lock_then_unlock_preserves_invariant() {
        let ledger = BalanceLedger::new();
        ledger.credit("0xabc", dec!(1000), "faucet", "req-1").unwrap();
        ledger.lock("0xabc", dec!(200), "order-margin", "order-1").unwrap();
        let balance = ledger.get("0xabc");
        assert_eq!(balance.free, dec!(800));
        assert_eq!(balance.locked, dec!(200));
        assert!(balance.is_consistent());

        ledger.unlock("0xabc", dec!(200), "order-cancel", "order-1").unwrap();
        let balance = ledger.get("0xabc");
        assert_eq!(balance.free, dec!(1000));
        assert_eq!(balance.locked, dec!(0));
        assert!(balance.is_consistent());
    }

    #[test]
    fn lock_beyond_free_is_rejected() {
        let ledger = BalanceLedger::new();
        ledger.credit("0xabc", dec!(100), "faucet", "req-1").unwrap();
        let err = ledger.lock("0xabc", dec!(200), "order-margin", "order-1").unwrap_err();
        assert!(matches!(err, BalanceLedgerError::InsufficientFree { .. }));
    }

    #[test]
    fn forfeit_removes_from_locked_without_touching_free() {
        let ledger = BalanceLedger::new();
        ledger.credit("0xabc", dec!(1000), "faucet", "req-1").unwrap();
        ledger.lock("0xabc", dec!(200), "order-margin", "order-1").unwrap();
        ledger.forfeit("0xabc", dec!(200), "liquidation", "order-1").unwrap();
        let balance = ledger.get("0xabc");
        assert_eq!(balance.free, dec!(800));
        assert_eq!(balance.locked, dec!(0));
        assert!(balance.is_consistent());
    }

    #[test]
    fn history_is_append_only_and_filtered_by_address() {
        let ledger = BalanceLedger::new();
        ledger.credit("0xabc", dec!(100), "faucet", "req-1").unwrap();
        ledger.credit("0xdef", dec!(50), "faucet", "req-2").unwrap();
        assert_eq!(ledger.history("0xabc").len(), 1);
        assert_eq!(ledger.history("0xdef").len(), 1);
    }
}

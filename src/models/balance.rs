use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of a balance mutation, recorded verbatim in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "balance_change_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BalanceChangeKind {
    Credit,
    Debit,
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub address: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn new(address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            address: address.into(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
            total_credits: Decimal::ZERO,
            total_debits: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// `free + locked = totalCredits - totalDebits`, the invariant this entity must never violate.
    pub fn is_consistent(&self) -> bool {
        self.free + self.locked == self.total_credits - self.total_debits
    }
}

/// One append-only entry in a balance's change log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BalanceChange {
    pub id: Uuid,
    pub address: String,
    pub kind: BalanceChangeKind,
    pub amount: Decimal,
    pub reason: String,
    pub reference_id: String,
    pub free_after: Decimal,
    pub locked_after: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

impl From<Balance> for BalanceResponse {
    fn from(balance: Balance) -> Self {
        Self {
            total: balance.free + balance.locked,
            address: balance.address,
            free: balance.free,
            locked: balance.locked,
        }
    }
}

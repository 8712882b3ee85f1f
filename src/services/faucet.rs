//! Once-per-cooldown balance faucet, keyed by address rather than IP (spec §4.8). Grounded on
//! the same DashMap sliding-window shape as the per-IP rate limiter, but tracks a single
//! next-eligible timestamp per address instead of a request count per window.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::services::balance_ledger::BalanceLedger;

#[derive(Debug, thiserror::Error)]
pub enum FaucetError {
    #[error("faucet claim rate limited, next eligible at {next_eligible_at}")]
    RateLimited { next_eligible_at: DateTime<Utc> },
}

pub struct Faucet {
    amount: Decimal,
    cooldown: chrono::Duration,
    last_claim: DashMap<String, DateTime<Utc>>,
    balance_ledger: Arc<BalanceLedger>,
}

impl Faucet {
    pub fn new(amount: Decimal, cooldown_secs: u64, balance_ledger: Arc<BalanceLedger>) -> Arc<Self> {
        Arc::new(Self {
            amount,
            cooldown: chrono::Duration::seconds(cooldown_secs as i64),
            last_claim: DashMap::new(),
            balance_ledger,
        })
    }

    /// Credits the faucet amount to `address`'s free balance, or rejects with the next eligible
    /// timestamp if still within cooldown.
    pub fn claim(&self, address: &str) -> Result<Decimal, FaucetError> {
        let now = Utc::now();
        if let Some(last) = self.last_claim.get(address) {
            let next_eligible_at = *last + self.cooldown;
            if now < next_eligible_at {
                return Err(FaucetError::RateLimited { next_eligible_at });
            }
        }
        self.last_claim.insert(address.to_string(), now);
        let balance = self
            .balance_ledger
            .credit(address, self.amount, "faucet", address)
            .expect("faucet amount is always positive");
        Ok(balance.free)
    }

    pub fn next_eligible_at(&self, address: &str) -> Option<DateTime<Utc>> {
        self.last_claim.get(address).map(|last| *last + self.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_claim_credits_and_second_is_rate_limited_within_cooldown() {
        let ledger = BalanceLedger::new();
        let faucet = Faucet::new(dec!(10000), 3600, ledger.clone());

        let free = faucet.claim("0xabc").unwrap();
        assert_eq!(free, dec!(10000));
        assert_eq!(ledger.get("0xabc").free, dec!(10000));

        let err = faucet.claim("0xabc").unwrap_err();
        assert!(matches!(err, FaucetError::RateLimited { .. }));
    }

    #[test]
    fn distinct_addresses_have_independent_cooldowns() {
        let ledger = BalanceLedger::new();
        let faucet = Faucet::new(dec!(10000), 3600, ledger.clone());

        faucet.claim("0xabc").unwrap();
        faucet.claim("0xdef").unwrap();
        assert_eq!(ledger.get("0xdef").free, dec!(10000));
    }
}

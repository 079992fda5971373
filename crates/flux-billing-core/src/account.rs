//! Credit account types.
//!
//! An account is the single source of truth for a user's spendable credits.
//! Balances are only ever changed inside a store transaction that also writes
//! the matching ledger entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, UserId};

/// A user's credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: AccountId,

    /// Owning user (unique).
    pub user_id: UserId,

    /// Current spendable credits. Never negative.
    pub credit: i64,

    /// When the account was provisioned.
    pub created_at: DateTime<Utc>,

    /// When the balance last changed.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a zero-balance account record.
    #[must_use]
    pub fn new(id: AccountId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            credit: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover `amount` credits.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credit >= amount
    }

    /// The balance after applying `delta`, or `None` if it would go negative
    /// or overflow.
    #[must_use]
    pub fn balance_after(&self, delta: i64) -> Option<i64> {
        self.credit.checked_add(delta).filter(|b| *b >= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(credit: i64) -> Account {
        let mut account = Account::new(AccountId::new(1), "user_a".parse().unwrap());
        account.credit = credit;
        account
    }

    #[test]
    fn new_account_has_zero_balance() {
        let account = Account::new(AccountId::new(1), "user_a".parse().unwrap());
        assert_eq!(account.credit, 0);
    }

    #[test]
    fn account_sufficient_credits() {
        let account = account(100);
        assert!(account.has_sufficient_credits(80));
        assert!(account.has_sufficient_credits(100));
        assert!(!account.has_sufficient_credits(101));
    }

    #[test]
    fn balance_after_never_negative() {
        let account = account(10);
        assert_eq!(account.balance_after(-10), Some(0));
        assert_eq!(account.balance_after(-11), None);
        assert_eq!(account.balance_after(200), Some(210));
        assert_eq!(account.balance_after(i64::MAX), None);
    }
}

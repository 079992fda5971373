//! Ledger and billing record types.
//!
//! Every change to an account's credit produces exactly one [`LedgerEntry`]
//! carrying the post-change balance. Debits additionally record a
//! [`Billing`] row describing the business reason.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingId, JobId, LedgerEntryId, UserId};

/// An immutable credit ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id.
    pub id: LedgerEntryId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Signed credit delta. Positive = credit, negative = debit.
    pub credit: i64,

    /// Balance immediately after this entry was applied.
    pub balance: i64,

    /// Billing row this entry settles, if any.
    pub billing_id: Option<BillingId>,

    /// Kind of event.
    pub entry_type: LedgerEntryType,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// Kind of credit-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryType {
    /// Credits spent on a generation.
    Generate,
    /// Credits purchased through a charge order.
    Charge,
}

impl LedgerEntryType {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "Generate",
            Self::Charge => "Charge",
        }
    }
}

impl FromStr for LedgerEntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Generate" => Ok(Self::Generate),
            "Charge" => Ok(Self::Charge),
            other => Err(format!("unknown ledger entry type: {other}")),
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A billing row recording why credits moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Billing {
    /// Billing id.
    pub id: BillingId,
    /// Billed user.
    pub user_id: UserId,
    /// Generation job this billing pays for.
    pub flux_id: Option<JobId>,
    /// Settlement state.
    pub state: BillingState,
    /// Signed amount in credits.
    pub amount: i64,
    /// Direction of the billing.
    pub billing_type: BillingType,
    /// Human-readable reason.
    pub description: String,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

/// Settlement state of a billing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingState {
    /// Settled.
    Done,
    /// Awaiting settlement.
    Pending,
    /// Settlement failed.
    Failed,
}

impl BillingState {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "Done",
            Self::Pending => "Pending",
            Self::Failed => "Failed",
        }
    }
}

impl FromStr for BillingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Done" => Ok(Self::Done),
            "Pending" => Ok(Self::Pending),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown billing state: {other}")),
        }
    }
}

/// Direction of a billing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingType {
    /// Credits leaving the account.
    Withdraw,
    /// Credits entering the account.
    Deposit,
}

impl BillingType {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Withdraw => "Withdraw",
            Self::Deposit => "Deposit",
        }
    }
}

impl FromStr for BillingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Withdraw" => Ok(Self::Withdraw),
            "Deposit" => Ok(Self::Deposit),
            other => Err(format!("unknown billing type: {other}")),
        }
    }
}

/// A debit to apply for an admitted generation.
#[derive(Debug, Clone)]
pub struct GenerationDebit {
    /// The paying user.
    pub user_id: UserId,
    /// The provider job being paid for.
    pub job_id: JobId,
    /// Credits to withdraw (positive).
    pub credits: i64,
    /// Billing description.
    pub description: String,
}

/// Records written by a committed generation debit.
#[derive(Debug, Clone)]
pub struct DebitReceipt {
    /// Balance after the debit.
    pub balance: i64,
    /// The withdraw billing row.
    pub billing: Billing,
    /// The ledger entry.
    pub entry: LedgerEntry,
}

/// Sum the deltas of a sequence of ledger entries.
#[must_use]
pub fn ledger_total<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries.into_iter().map(|e| e.credit).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(credit: i64, balance: i64) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(1),
            user_id: "user_a".parse().unwrap(),
            credit,
            balance,
            billing_id: None,
            entry_type: if credit < 0 {
                LedgerEntryType::Generate
            } else {
                LedgerEntryType::Charge
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ledger_total_sums_deltas() {
        let entries = [entry(200, 200), entry(-80, 120), entry(-15, 105)];
        assert_eq!(ledger_total(&entries), 105);
    }

    #[test]
    fn stored_names_roundtrip() {
        for t in [LedgerEntryType::Generate, LedgerEntryType::Charge] {
            assert_eq!(t.as_str().parse::<LedgerEntryType>().unwrap(), t);
        }
        assert_eq!("Withdraw".parse::<BillingType>().unwrap(), BillingType::Withdraw);
        assert_eq!("Done".parse::<BillingState>().unwrap(), BillingState::Done);
        assert!("Refund".parse::<LedgerEntryType>().is_err());
    }
}

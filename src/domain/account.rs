use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a hub user. Users are created elsewhere; the ledger only keys on the id.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Spendable funds of the user.
    Current,
    /// Contra account inbound payments are debited from.
    Incoming,
    /// Contra account outbound payments are credited to.
    Outgoing,
}

impl AccountKind {
    pub const ALL: [AccountKind; 3] = [
        AccountKind::Current,
        AccountKind::Incoming,
        AccountKind::Outgoing,
    ];

    /// Signed effect of an entry on this kind of account.
    ///
    /// `current` and `outgoing` grow with credits, `incoming` grows with debits,
    /// so every derived balance is non-negative in a consistent ledger.
    pub fn signed(self, amount: i64, is_credit: bool) -> i64 {
        match (self, is_credit) {
            (AccountKind::Incoming, true) => -amount,
            (AccountKind::Incoming, false) => amount,
            (_, true) => amount,
            (_, false) => -amount,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountKind::Current => "current",
            AccountKind::Incoming => "incoming",
            AccountKind::Outgoing => "outgoing",
        };
        f.write_str(name)
    }
}

/// A ledger account. Its balance is never stored here; it is the signed sum
/// of the entries referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user: UserId,
    pub kind: AccountKind,
}

/// Immutable double-entry record moving `amount` from the debit to the credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub id: i64,
    pub user: UserId,
    pub debit_account_id: i64,
    pub credit_account_id: i64,
    pub amount: i64,
    pub invoice_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TransactionEntry {
    /// Signed effect of this entry on `account`'s derived balance.
    pub fn effect_on(&self, account: &Account) -> i64 {
        let mut delta = 0;
        if self.credit_account_id == account.id {
            delta += account.kind.signed(self.amount, true);
        }
        if self.debit_account_id == account.id {
            delta += account.kind.signed(self.amount, false);
        }
        delta
    }
}

/// An entry that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub user: UserId,
    pub debit: Account,
    pub credit: Account,
    pub amount: i64,
    pub invoice_id: Option<i64>,
}

/// Derived balances of one user's three accounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserBalances {
    pub user: UserId,
    pub current: i64,
    pub incoming: i64,
    pub outgoing: i64,
}

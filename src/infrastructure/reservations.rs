//! Entries staged by open store transactions.
//!
//! A staged debit is visible to every other transaction on the same store from
//! `insert_entry` until commit or rollback, so two transactions cannot both
//! spend the same funds while their network calls are in flight.

use crate::domain::account::{Account, TransactionEntry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub(crate) struct StagedEntry {
    pub debit: Account,
    pub credit: Account,
    pub entry: TransactionEntry,
}

impl StagedEntry {
    pub fn accounts(&self) -> [&Account; 2] {
        [&self.debit, &self.credit]
    }
}

/// Reservation table shared between clones of one store.
///
/// Callers must hold the store's write serialization while checking and
/// staging, so the check and the reservation are atomic.
#[derive(Debug, Default, Clone)]
pub(crate) struct Reservations {
    next: Arc<AtomicU64>,
    open: Arc<Mutex<HashMap<u64, Vec<StagedEntry>>>>,
}

impl Reservations {
    fn table(&self) -> MutexGuard<'_, HashMap<u64, Vec<StagedEntry>>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a reservation slot for a new transaction.
    pub fn open(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Staged effect on `account` as seen by transaction `tx`.
    ///
    /// The transaction's own entries count in full. Other transactions' entries
    /// count only where they lower the balance, since they may still roll back.
    pub fn effect_on(&self, tx: u64, account: &Account) -> i64 {
        self.table()
            .iter()
            .flat_map(|(owner, entries)| entries.iter().map(move |s| (*owner, s)))
            .map(|(owner, staged)| {
                let effect = staged.entry.effect_on(account);
                if owner == tx { effect } else { effect.min(0) }
            })
            .sum()
    }

    /// Whether `candidate` keeps both of its accounts non-negative, given each
    /// account's committed balance.
    pub fn admits(
        &self,
        tx: u64,
        candidate: &StagedEntry,
        committed: impl Fn(&Account) -> i64,
    ) -> bool {
        candidate.accounts().into_iter().all(|account| {
            committed(account) + self.effect_on(tx, account) + candidate.entry.effect_on(account)
                >= 0
        })
    }

    pub fn stage(&self, tx: u64, staged: StagedEntry) {
        self.table().entry(tx).or_default().push(staged);
    }

    /// Drops the transaction's reservations and returns its staged entries.
    pub fn release(&self, tx: u64) -> Vec<StagedEntry> {
        self.table().remove(&tx).unwrap_or_default()
    }
}

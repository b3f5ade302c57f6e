use crate::domain::account::{Account, AccountKind, NewEntry, TransactionEntry, UserId};
use crate::domain::asset::{Address, AddressKey, AssetEntry};
use crate::domain::invoice::{Invoice, InvoiceDirection, InvoiceState, NewInvoice};
use crate::domain::ports::{LedgerStore, LedgerTransaction, StoreResult};
use crate::error::StoreError;
use crate::infrastructure::reservations::{Reservations, StagedEntry};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    accounts: HashMap<(UserId, AccountKind), Account>,
    entries: Vec<TransactionEntry>,
    invoices: BTreeMap<i64, Invoice>,
    addresses: HashMap<AddressKey, Address>,
    asset_entries: Vec<AssetEntry>,
}

impl Tables {
    fn balance(&self, account: &Account) -> i64 {
        self.entries.iter().map(|entry| entry.effect_on(account)).sum()
    }

    fn check_version(&self, invoice: &Invoice) -> StoreResult<()> {
        match self.invoices.get(&invoice.id) {
            None => Err(StoreError::NotFound),
            Some(stored) if stored.version != invoice.version => Err(StoreError::VersionConflict {
                expected: invoice.version,
            }),
            Some(_) => Ok(()),
        }
    }

    fn asset_balance(&self, user: UserId, asset_id: &str) -> i64 {
        self.asset_entries
            .iter()
            .filter(|e| e.user == user && e.asset_id == asset_id)
            .map(|e| e.delta)
            .sum()
    }
}

/// A thread-safe in-memory ledger.
///
/// Uses `Arc<RwLock<..>>` tables shared between clones. A staged entry reserves
/// its debit against every other open transaction until commit or rollback;
/// commit applies the writes under the write lock after re-checking the
/// balance constraint and invoice versions against the committed state.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    sequence: Arc<AtomicI64>,
    reservations: Reservations,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn account_for(&self, user: UserId, kind: AccountKind) -> StoreResult<Account> {
        if let Some(account) = self.tables.read().await.accounts.get(&(user, kind)) {
            return Ok(account.clone());
        }
        let mut tables = self.tables.write().await;
        let id = self.next_id();
        let account = tables
            .accounts
            .entry((user, kind))
            .or_insert_with(|| Account { id, user, kind });
        Ok(account.clone())
    }

    async fn balance(&self, user: UserId, kind: AccountKind) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .get(&(user, kind))
            .map_or(0, |account| tables.balance(account)))
    }

    async fn users(&self) -> StoreResult<Vec<UserId>> {
        let tables = self.tables.read().await;
        let users: BTreeSet<UserId> = tables.accounts.keys().map(|(user, _)| *user).collect();
        Ok(users.into_iter().collect())
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> StoreResult<Invoice> {
        let invoice = invoice.into_invoice(self.next_id(), Utc::now());
        let mut tables = self.tables.write().await;
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> StoreResult<Invoice> {
        let mut tables = self.tables.write().await;
        tables.check_version(invoice)?;
        let mut updated = invoice.clone();
        updated.version += 1;
        tables.invoices.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn get_invoice(&self, id: i64) -> StoreResult<Option<Invoice>> {
        Ok(self.tables.read().await.invoices.get(&id).cloned())
    }

    async fn find_invoice_by_payment_hash(
        &self,
        user: UserId,
        payment_hash: &str,
    ) -> StoreResult<Option<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .invoices
            .values()
            .find(|i| {
                i.user == user && !i.payment_hash.is_empty() && i.payment_hash == payment_hash
            })
            .cloned())
    }

    async fn invoices_in_state(
        &self,
        direction: InvoiceDirection,
        state: InvoiceState,
    ) -> StoreResult<Vec<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .invoices
            .values()
            .filter(|i| i.direction == direction && i.state == state)
            .cloned()
            .collect())
    }

    async fn entries_for_invoice(&self, invoice_id: i64) -> StoreResult<Vec<TransactionEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.invoice_id == Some(invoice_id))
            .cloned()
            .collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            slot: self.reservations.open(),
            store: self.clone(),
            invoices: Vec::new(),
        }))
    }

    async fn find_address(&self, key: &AddressKey) -> StoreResult<Option<Address>> {
        Ok(self.tables.read().await.addresses.get(key).cloned())
    }

    async fn insert_address(&self, key: &AddressKey, encoded: &str) -> StoreResult<Address> {
        let mut tables = self.tables.write().await;
        if tables.addresses.contains_key(key) {
            return Err(StoreError::UniqueViolation(format!(
                "address for user {} asset {} amount {}",
                key.user, key.asset_id, key.amount
            )));
        }
        let address = Address {
            id: self.next_id(),
            user: key.user,
            asset_id: key.asset_id.clone(),
            amount: key.amount,
            encoded: encoded.to_string(),
            created_at: Utc::now(),
        };
        tables.addresses.insert(key.clone(), address.clone());
        Ok(address)
    }

    async fn insert_asset_entry(
        &self,
        user: UserId,
        asset_id: &str,
        delta: i64,
    ) -> StoreResult<AssetEntry> {
        let mut tables = self.tables.write().await;
        if tables.asset_balance(user, asset_id) + delta < 0 {
            return Err(StoreError::BalanceViolation);
        }
        let entry = AssetEntry {
            id: self.next_id(),
            user,
            asset_id: asset_id.to_string(),
            delta,
            created_at: Utc::now(),
        };
        tables.asset_entries.push(entry.clone());
        Ok(entry)
    }

    async fn asset_balance(&self, user: UserId, asset_id: &str) -> StoreResult<i64> {
        Ok(self.tables.read().await.asset_balance(user, asset_id))
    }
}

/// Writes staged by an open in-memory transaction. Its entries live in the
/// store's reservation table under `slot`; dropping the transaction releases them.
pub struct InMemoryTransaction {
    store: InMemoryLedgerStore,
    slot: u64,
    invoices: Vec<Invoice>,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.store.reservations.release(self.slot);
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TransactionEntry> {
        let staged = StagedEntry {
            entry: TransactionEntry {
                id: self.store.next_id(),
                user: entry.user,
                debit_account_id: entry.debit.id,
                credit_account_id: entry.credit.id,
                amount: entry.amount,
                invoice_id: entry.invoice_id,
                created_at: Utc::now(),
            },
            debit: entry.debit,
            credit: entry.credit,
        };
        let tables = self.store.tables.write().await;
        let reservations = &self.store.reservations;
        if !reservations.admits(self.slot, &staged, |account| tables.balance(account)) {
            return Err(StoreError::BalanceViolation);
        }
        let inserted = staged.entry.clone();
        reservations.stage(self.slot, staged);
        Ok(inserted)
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<Invoice> {
        let staged_version = self
            .invoices
            .iter()
            .rev()
            .find(|staged| staged.id == invoice.id)
            .map(|staged| staged.version + 1);
        match staged_version {
            Some(version) if version != invoice.version => {
                return Err(StoreError::VersionConflict {
                    expected: invoice.version,
                });
            }
            Some(_) => {}
            None => self.store.tables.read().await.check_version(invoice)?,
        }
        let mut updated = invoice.clone();
        updated.version += 1;
        self.invoices.push(invoice.clone());
        Ok(updated)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let store = self.store.clone();
        let invoices = std::mem::take(&mut self.invoices);
        let mut tables = store.tables.write().await;
        let entries = store.reservations.release(self.slot);

        // Re-validate against whatever committed since the writes were staged.
        let mut applied: Vec<TransactionEntry> = Vec::with_capacity(entries.len());
        for staged in &entries {
            let admitted = staged.accounts().into_iter().all(|account| {
                let pending: i64 = applied.iter().map(|e| e.effect_on(account)).sum();
                tables.balance(account) + pending + staged.entry.effect_on(account) >= 0
            });
            if !admitted {
                return Err(StoreError::BalanceViolation);
            }
            applied.push(staged.entry.clone());
        }
        let mut versions: HashMap<i64, u32> = HashMap::new();
        for invoice in &invoices {
            let expected = versions.get(&invoice.id).copied();
            match expected {
                Some(v) if v != invoice.version => {
                    return Err(StoreError::VersionConflict {
                        expected: invoice.version,
                    });
                }
                Some(_) => {}
                None => tables.check_version(invoice)?,
            }
            versions.insert(invoice.id, invoice.version + 1);
        }

        tables.entries.extend(applied);
        for invoice in invoices {
            let mut updated = invoice;
            updated.version += 1;
            tables.invoices.insert(updated.id, updated);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.store.reservations.release(self.slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_invoice(user: UserId) -> NewInvoice {
        NewInvoice {
            user,
            direction: InvoiceDirection::Outgoing,
            amount: 10,
            memo: "memo".into(),
            payment_request: "lnbc1".into(),
            payment_hash: "ab".into(),
            description_hash: None,
            destination: None,
        }
    }

    async fn fund(store: &InMemoryLedgerStore, user: UserId, amount: i64) {
        let incoming = store.account_for(user, AccountKind::Incoming).await.unwrap();
        let current = store.account_for(user, AccountKind::Current).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_entry(NewEntry {
            user,
            debit: incoming,
            credit: current,
            amount,
            invoice_id: None,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_account_for_is_lazy_and_stable() {
        let store = InMemoryLedgerStore::new();
        let first = store.account_for(1, AccountKind::Current).await.unwrap();
        let second = store.account_for(1, AccountKind::Current).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.users().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_derived_balances() {
        let store = InMemoryLedgerStore::new();
        fund(&store, 1, 100).await;
        assert_eq!(store.balance(1, AccountKind::Current).await.unwrap(), 100);
        assert_eq!(store.balance(1, AccountKind::Incoming).await.unwrap(), 100);
        assert_eq!(store.balance(1, AccountKind::Outgoing).await.unwrap(), 0);
        assert_eq!(store.balance(2, AccountKind::Current).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_negative_balance_rejected_when_staged() {
        let store = InMemoryLedgerStore::new();
        fund(&store, 1, 50).await;
        let current = store.account_for(1, AccountKind::Current).await.unwrap();
        let outgoing = store.account_for(1, AccountKind::Outgoing).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx
            .insert_entry(NewEntry {
                user: 1,
                debit: current,
                credit: outgoing,
                amount: 51,
                invoice_id: None,
            })
            .await;
        assert_eq!(result, Err(StoreError::BalanceViolation));
    }

    #[tokio::test]
    async fn test_staged_debit_reserves_funds_for_other_transactions() {
        let store = InMemoryLedgerStore::new();
        fund(&store, 1, 100).await;
        let current = store.account_for(1, AccountKind::Current).await.unwrap();
        let outgoing = store.account_for(1, AccountKind::Outgoing).await.unwrap();
        let spend = NewEntry {
            user: 1,
            debit: current,
            credit: outgoing,
            amount: 80,
            invoice_id: None,
        };

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_entry(spend.clone()).await.unwrap();
        assert_eq!(
            second.insert_entry(spend.clone()).await,
            Err(StoreError::BalanceViolation)
        );

        first.rollback().await.unwrap();
        second.insert_entry(spend).await.unwrap();
        second.commit().await.unwrap();
        assert_eq!(store.balance(1, AccountKind::Current).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_reservation() {
        let store = InMemoryLedgerStore::new();
        fund(&store, 1, 100).await;
        let current = store.account_for(1, AccountKind::Current).await.unwrap();
        let outgoing = store.account_for(1, AccountKind::Outgoing).await.unwrap();
        let spend = NewEntry {
            user: 1,
            debit: current,
            credit: outgoing,
            amount: 100,
            invoice_id: None,
        };

        {
            let mut abandoned = store.begin().await.unwrap();
            abandoned.insert_entry(spend.clone()).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        tx.insert_entry(spend).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.balance(1, AccountKind::Current).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryLedgerStore::new();
        fund(&store, 1, 100).await;
        let invoice = store.insert_invoice(new_invoice(1)).await.unwrap();
        let current = store.account_for(1, AccountKind::Current).await.unwrap();
        let outgoing = store.account_for(1, AccountKind::Outgoing).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_entry(NewEntry {
            user: 1,
            debit: current,
            credit: outgoing,
            amount: 10,
            invoice_id: Some(invoice.id),
        })
        .await
        .unwrap();
        let mut settled = invoice.clone();
        settled.state = InvoiceState::Settled;
        tx.update_invoice(&settled).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.entries_for_invoice(invoice.id).await.unwrap().is_empty());
        let stored = store.get_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.state, InvoiceState::Initialized);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_update_invoice_compare_and_set() {
        let store = InMemoryLedgerStore::new();
        let invoice = store.insert_invoice(new_invoice(1)).await.unwrap();

        let updated = store.update_invoice(&invoice).await.unwrap();
        assert_eq!(updated.version, 1);

        // Stale copy
        assert_eq!(
            store.update_invoice(&invoice).await,
            Err(StoreError::VersionConflict { expected: 0 })
        );
    }

    #[tokio::test]
    async fn test_address_uniqueness() {
        let store = InMemoryLedgerStore::new();
        let key = AddressKey::new(3, "deadbeef", 100);
        let address = store.insert_address(&key, "taprt1abc").await.unwrap();
        assert_eq!(store.find_address(&key).await.unwrap(), Some(address));
        assert!(matches!(
            store.insert_address(&key, "taprt1def").await,
            Err(StoreError::UniqueViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_asset_entries_cannot_go_negative() {
        let store = InMemoryLedgerStore::new();
        store.insert_asset_entry(1, "aa", 10).await.unwrap();
        store.insert_asset_entry(1, "aa", -4).await.unwrap();
        assert_eq!(store.asset_balance(1, "aa").await.unwrap(), 6);
        assert_eq!(
            store.insert_asset_entry(1, "aa", -7).await,
            Err(StoreError::BalanceViolation)
        );
        assert_eq!(store.asset_balance(1, "bb").await.unwrap(), 0);
    }
}

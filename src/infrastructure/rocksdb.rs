use crate::domain::account::{Account, AccountKind, NewEntry, TransactionEntry, UserId};
use crate::domain::asset::{Address, AddressKey, AssetEntry};
use crate::domain::invoice::{Invoice, InvoiceDirection, InvoiceState, NewInvoice};
use crate::domain::ports::{LedgerStore, LedgerTransaction, StoreResult};
use crate::error::StoreError;
use crate::infrastructure::reservations::{Reservations, StagedEntry};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

/// Column Family for accounts, keyed by `user:kind`.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for transaction entries, keyed by id.
pub const CF_ENTRIES: &str = "entries";
/// Column Family for invoices, keyed by id.
pub const CF_INVOICES: &str = "invoices";
/// Column Family for asset receive addresses, keyed by `user:asset:amount`.
pub const CF_ADDRESSES: &str = "addresses";
/// Column Family for asset ledger entries, keyed by id.
pub const CF_ASSET_ENTRIES: &str = "asset_entries";
/// Column Family for the id sequence.
pub const CF_META: &str = "meta";

const SEQUENCE_KEY: &[u8] = b"sequence";

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Backend(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Backend(format!("Deserialization error: {e}")))
}

fn account_key(user: UserId, kind: AccountKind) -> Vec<u8> {
    format!("{user}:{kind}").into_bytes()
}

fn address_key(key: &AddressKey) -> Vec<u8> {
    format!("{}:{}:{}", key.user, key.asset_id, key.amount).into_bytes()
}

/// A persistent ledger using RocksDB.
///
/// Every table lives in its own Column Family with JSON values. Writes that must
/// check-then-write (constraints, version checks, commits) run under one
/// writer lock and land as a single atomic `WriteBatch`. Staged entries reserve
/// their debits against other open transactions until commit or rollback.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
    sequence: Arc<AtomicI64>,
    writer: Arc<Mutex<()>>,
    reservations: Reservations,
}

impl RocksDbLedgerStore {
    /// Opens or creates a ledger at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_ACCOUNTS,
            CF_ENTRIES,
            CF_INVOICES,
            CF_ADDRESSES,
            CF_ASSET_ENTRIES,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let meta = db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::Backend("meta column family not found".to_string()))?;
        let sequence = match db.get_cf(meta, SEQUENCE_KEY)? {
            Some(bytes) => decode::<i64>(&bytes)?,
            None => 0,
        };

        Ok(Self {
            db: Arc::new(db),
            sequence: Arc::new(AtomicI64::new(sequence)),
            writer: Arc::new(Mutex::new(())),
            reservations: Reservations::default(),
        })
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("{name} column family not found")))
    }

    /// Allocates an id and stages the advanced sequence into `batch`.
    fn next_id(&self, batch: &mut WriteBatch) -> StoreResult<i64> {
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        batch.put_cf(self.cf(CF_META)?, SEQUENCE_KEY, encode(&id)?);
        Ok(id)
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> StoreResult<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> StoreResult<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn committed_entries(&self) -> StoreResult<Vec<TransactionEntry>> {
        self.scan::<TransactionEntry>(CF_ENTRIES)
    }

    fn check_version(&self, invoice: &Invoice) -> StoreResult<()> {
        match self.get::<Invoice>(CF_INVOICES, &invoice.id.to_be_bytes())? {
            None => Err(StoreError::NotFound),
            Some(stored) if stored.version != invoice.version => Err(StoreError::VersionConflict {
                expected: invoice.version,
            }),
            Some(_) => Ok(()),
        }
    }

    fn asset_balance_sync(&self, user: UserId, asset_id: &str) -> StoreResult<i64> {
        Ok(self
            .scan::<AssetEntry>(CF_ASSET_ENTRIES)?
            .iter()
            .filter(|e| e.user == user && e.asset_id == asset_id)
            .map(|e| e.delta)
            .sum())
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn account_for(&self, user: UserId, kind: AccountKind) -> StoreResult<Account> {
        let key = account_key(user, kind);
        if let Some(account) = self.get(CF_ACCOUNTS, &key)? {
            return Ok(account);
        }
        let _guard = self.writer.lock().await;
        if let Some(account) = self.get(CF_ACCOUNTS, &key)? {
            return Ok(account);
        }
        let mut batch = WriteBatch::default();
        let account = Account {
            id: self.next_id(&mut batch)?,
            user,
            kind,
        };
        batch.put_cf(self.cf(CF_ACCOUNTS)?, key, encode(&account)?);
        self.db.write(batch)?;
        Ok(account)
    }

    async fn balance(&self, user: UserId, kind: AccountKind) -> StoreResult<i64> {
        match self.get::<Account>(CF_ACCOUNTS, &account_key(user, kind))? {
            Some(account) => Ok(self
                .committed_entries()?
                .iter()
                .map(|entry| entry.effect_on(&account))
                .sum()),
            None => Ok(0),
        }
    }

    async fn users(&self) -> StoreResult<Vec<UserId>> {
        let users: BTreeSet<UserId> = self
            .scan::<Account>(CF_ACCOUNTS)?
            .into_iter()
            .map(|account| account.user)
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> StoreResult<Invoice> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();
        let invoice = invoice.into_invoice(self.next_id(&mut batch)?, Utc::now());
        batch.put_cf(self.cf(CF_INVOICES)?, invoice.id.to_be_bytes(), encode(&invoice)?);
        self.db.write(batch)?;
        Ok(invoice)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> StoreResult<Invoice> {
        let _guard = self.writer.lock().await;
        self.check_version(invoice)?;
        let mut updated = invoice.clone();
        updated.version += 1;
        self.db
            .put_cf(self.cf(CF_INVOICES)?, updated.id.to_be_bytes(), encode(&updated)?)?;
        Ok(updated)
    }

    async fn get_invoice(&self, id: i64) -> StoreResult<Option<Invoice>> {
        self.get(CF_INVOICES, &id.to_be_bytes())
    }

    async fn find_invoice_by_payment_hash(
        &self,
        user: UserId,
        payment_hash: &str,
    ) -> StoreResult<Option<Invoice>> {
        Ok(self
            .scan::<Invoice>(CF_INVOICES)?
            .into_iter()
            .find(|i| {
                i.user == user && !i.payment_hash.is_empty() && i.payment_hash == payment_hash
            }))
    }

    async fn invoices_in_state(
        &self,
        direction: InvoiceDirection,
        state: InvoiceState,
    ) -> StoreResult<Vec<Invoice>> {
        Ok(self
            .scan::<Invoice>(CF_INVOICES)?
            .into_iter()
            .filter(|i| i.direction == direction && i.state == state)
            .collect())
    }

    async fn entries_for_invoice(&self, invoice_id: i64) -> StoreResult<Vec<TransactionEntry>> {
        Ok(self
            .scan::<TransactionEntry>(CF_ENTRIES)?
            .into_iter()
            .filter(|e| e.invoice_id == Some(invoice_id))
            .collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(RocksDbTransaction {
            slot: self.reservations.open(),
            store: self.clone(),
            invoices: Vec::new(),
        }))
    }

    async fn find_address(&self, key: &AddressKey) -> StoreResult<Option<Address>> {
        self.get(CF_ADDRESSES, &address_key(key))
    }

    async fn insert_address(&self, key: &AddressKey, encoded: &str) -> StoreResult<Address> {
        let _guard = self.writer.lock().await;
        let row_key = address_key(key);
        if self.get::<Address>(CF_ADDRESSES, &row_key)?.is_some() {
            return Err(StoreError::UniqueViolation(format!(
                "address for user {} asset {} amount {}",
                key.user, key.asset_id, key.amount
            )));
        }
        let mut batch = WriteBatch::default();
        let address = Address {
            id: self.next_id(&mut batch)?,
            user: key.user,
            asset_id: key.asset_id.clone(),
            amount: key.amount,
            encoded: encoded.to_string(),
            created_at: Utc::now(),
        };
        batch.put_cf(self.cf(CF_ADDRESSES)?, row_key, encode(&address)?);
        self.db.write(batch)?;
        Ok(address)
    }

    async fn insert_asset_entry(
        &self,
        user: UserId,
        asset_id: &str,
        delta: i64,
    ) -> StoreResult<AssetEntry> {
        let _guard = self.writer.lock().await;
        if self.asset_balance_sync(user, asset_id)? + delta < 0 {
            return Err(StoreError::BalanceViolation);
        }
        let mut batch = WriteBatch::default();
        let entry = AssetEntry {
            id: self.next_id(&mut batch)?,
            user,
            asset_id: asset_id.to_string(),
            delta,
            created_at: Utc::now(),
        };
        batch.put_cf(self.cf(CF_ASSET_ENTRIES)?, entry.id.to_be_bytes(), encode(&entry)?);
        self.db.write(batch)?;
        Ok(entry)
    }

    async fn asset_balance(&self, user: UserId, asset_id: &str) -> StoreResult<i64> {
        self.asset_balance_sync(user, asset_id)
    }
}

/// Writes staged by an open RocksDB transaction; applied as one `WriteBatch`.
pub struct RocksDbTransaction {
    store: RocksDbLedgerStore,
    slot: u64,
    invoices: Vec<Invoice>,
}

impl Drop for RocksDbTransaction {
    fn drop(&mut self) {
        self.store.reservations.release(self.slot);
    }
}

#[async_trait]
impl LedgerTransaction for RocksDbTransaction {
    async fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TransactionEntry> {
        let staged = StagedEntry {
            entry: TransactionEntry {
                id: 0,
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
        let _guard = self.store.writer.lock().await;
        let committed = self.store.committed_entries()?;
        let balance = |account: &Account| -> i64 {
            committed.iter().map(|entry| entry.effect_on(account)).sum()
        };
        let reservations = &self.store.reservations;
        if !reservations.admits(self.slot, &staged, balance) {
            return Err(StoreError::BalanceViolation);
        }
        let mut staged = staged;
        staged.entry.id = self.store.sequence.fetch_add(1, Ordering::SeqCst) + 1;
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
            None => self.store.check_version(invoice)?,
        }
        let mut updated = invoice.clone();
        updated.version += 1;
        self.invoices.push(invoice.clone());
        Ok(updated)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let store = self.store.clone();
        let invoices = std::mem::take(&mut self.invoices);
        let _guard = store.writer.lock().await;
        let entries = store.reservations.release(self.slot);

        let committed = store.committed_entries()?;
        let mut applied: Vec<TransactionEntry> = Vec::with_capacity(entries.len());
        for staged in &entries {
            let admitted = staged.accounts().into_iter().all(|account| {
                committed
                    .iter()
                    .chain(applied.iter())
                    .chain(std::iter::once(&staged.entry))
                    .map(|entry| entry.effect_on(account))
                    .sum::<i64>()
                    >= 0
            });
            if !admitted {
                return Err(StoreError::BalanceViolation);
            }
            applied.push(staged.entry.clone());
        }
        let mut versions: HashMap<i64, u32> = HashMap::new();
        for invoice in &invoices {
            match versions.get(&invoice.id) {
                Some(v) if *v != invoice.version => {
                    return Err(StoreError::VersionConflict {
                        expected: invoice.version,
                    });
                }
                Some(_) => {}
                None => store.check_version(invoice)?,
            }
            versions.insert(invoice.id, invoice.version + 1);
        }

        let mut batch = WriteBatch::default();
        let sequence = store.sequence.load(Ordering::SeqCst);
        batch.put_cf(store.cf(CF_META)?, SEQUENCE_KEY, encode(&sequence)?);
        for entry in &applied {
            batch.put_cf(store.cf(CF_ENTRIES)?, entry.id.to_be_bytes(), encode(entry)?);
        }
        for mut invoice in invoices {
            invoice.version += 1;
            batch.put_cf(store.cf(CF_INVOICES)?, invoice.id.to_be_bytes(), encode(&invoice)?);
        }
        store.db.write(batch)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.store.reservations.release(self.slot);
        Ok(())
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tahub::application::Hub;
use tahub::config::HubConfig;
use tahub::domain::account::{Account, AccountKind, NewEntry, TransactionEntry, UserId};
use tahub::domain::asset::{Address, AddressKey, AssetEntry};
use tahub::domain::invoice::{Invoice, InvoiceDirection, InvoiceState, NewInvoice};
use tahub::domain::ports::{
    AddInvoiceRequest, AddInvoiceResponse, ClientResult, LedgerStore, LedgerTransaction,
    PaymentNetworkClient, PaymentStatus, SendPaymentRequest, SendPaymentResponse, StoreResult,
};
use tahub::error::StoreError;
use tahub::infrastructure::in_memory::InMemoryLedgerStore;
use tahub::infrastructure::simulated::{
    SimulatedAssetNetwork, SimulatedPaymentNetwork, SimulatedRequestCodec,
};
use tokio::sync::Mutex;

/// In-memory ledger with switchable failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryLedgerStore,
    pub fail_commit: Arc<AtomicBool>,
    pub fail_update_invoice: AtomicBool,
    /// Fails only updates that move an invoice back to `initialized`.
    pub fail_release: AtomicBool,
    pub fail_find_address: AtomicBool,
    pub fail_insert_address: AtomicBool,
    /// When set, a competing resolver inserts this address just before ours.
    pub competing_address: Mutex<Option<String>>,
}

fn backend(what: &str) -> StoreError {
    StoreError::Backend(format!("injected {what} failure"))
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn account_for(&self, user: UserId, kind: AccountKind) -> StoreResult<Account> {
        self.inner.account_for(user, kind).await
    }

    async fn balance(&self, user: UserId, kind: AccountKind) -> StoreResult<i64> {
        self.inner.balance(user, kind).await
    }

    async fn users(&self) -> StoreResult<Vec<UserId>> {
        self.inner.users().await
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> StoreResult<Invoice> {
        self.inner.insert_invoice(invoice).await
    }

    async fn update_invoice(&self, invoice: &Invoice) -> StoreResult<Invoice> {
        if self.fail_update_invoice.load(Ordering::SeqCst) {
            return Err(backend("update"));
        }
        if self.fail_release.load(Ordering::SeqCst) && invoice.state == InvoiceState::Initialized {
            return Err(backend("release"));
        }
        self.inner.update_invoice(invoice).await
    }

    async fn get_invoice(&self, id: i64) -> StoreResult<Option<Invoice>> {
        self.inner.get_invoice(id).await
    }

    async fn find_invoice_by_payment_hash(
        &self,
        user: UserId,
        payment_hash: &str,
    ) -> StoreResult<Option<Invoice>> {
        self.inner.find_invoice_by_payment_hash(user, payment_hash).await
    }

    async fn invoices_in_state(
        &self,
        direction: InvoiceDirection,
        state: InvoiceState,
    ) -> StoreResult<Vec<Invoice>> {
        self.inner.invoices_in_state(direction, state).await
    }

    async fn entries_for_invoice(&self, invoice_id: i64) -> StoreResult<Vec<TransactionEntry>> {
        self.inner.entries_for_invoice(invoice_id).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(FlakyTransaction {
            inner: self.inner.begin().await?,
            fail_commit: self.fail_commit.clone(),
        }))
    }

    async fn find_address(&self, key: &AddressKey) -> StoreResult<Option<Address>> {
        if self.fail_find_address.load(Ordering::SeqCst) {
            return Err(backend("lookup"));
        }
        self.inner.find_address(key).await
    }

    async fn insert_address(&self, key: &AddressKey, encoded: &str) -> StoreResult<Address> {
        if self.fail_insert_address.load(Ordering::SeqCst) {
            return Err(backend("insert"));
        }
        if let Some(competitor) = self.competing_address.lock().await.take() {
            self.inner.insert_address(key, &competitor).await?;
        }
        self.inner.insert_address(key, encoded).await
    }

    async fn insert_asset_entry(
        &self,
        user: UserId,
        asset_id: &str,
        delta: i64,
    ) -> StoreResult<AssetEntry> {
        self.inner.insert_asset_entry(user, asset_id, delta).await
    }

    async fn asset_balance(&self, user: UserId, asset_id: &str) -> StoreResult<i64> {
        self.inner.asset_balance(user, asset_id).await
    }
}

struct FlakyTransaction {
    inner: Box<dyn LedgerTransaction>,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl LedgerTransaction for FlakyTransaction {
    async fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TransactionEntry> {
        self.inner.insert_entry(entry).await
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<Invoice> {
        self.inner.update_invoice(invoice).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            self.inner.rollback().await?;
            return Err(backend("commit"));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await
    }
}

/// Payment client that yields for `delay` before every send, so concurrent
/// payments interleave around the network call.
#[derive(Clone)]
pub struct DelayedPayments {
    inner: SimulatedPaymentNetwork,
    delay: Duration,
}

#[async_trait]
impl PaymentNetworkClient for DelayedPayments {
    async fn send_payment(&self, request: SendPaymentRequest) -> ClientResult<SendPaymentResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner.send_payment(request).await
    }

    async fn add_invoice(&self, request: AddInvoiceRequest) -> ClientResult<AddInvoiceResponse> {
        self.inner.add_invoice(request).await
    }

    async fn payment_status(&self, payment_hash: &str) -> ClientResult<PaymentStatus> {
        self.inner.payment_status(payment_hash).await
    }

    fn identity_pubkey(&self) -> String {
        self.inner.identity_pubkey()
    }
}

pub struct TestHub {
    pub hub: Hub,
    pub store: Arc<FlakyStore>,
    pub payments: SimulatedPaymentNetwork,
    pub assets: SimulatedAssetNetwork,
}

pub fn test_hub() -> TestHub {
    test_hub_with(HubConfig::default())
}

pub fn test_hub_with(config: HubConfig) -> TestHub {
    build(config, Duration::ZERO)
}

/// A hub whose payment sends each take `delay`.
pub fn test_hub_with_send_delay(delay: Duration) -> TestHub {
    build(HubConfig::default(), delay)
}

fn build(config: HubConfig, delay: Duration) -> TestHub {
    let store = Arc::new(FlakyStore::default());
    let payments = SimulatedPaymentNetwork::new(config.network);
    let assets = SimulatedAssetNetwork::new();
    let hub = Hub::new(
        store.clone(),
        Arc::new(DelayedPayments {
            inner: payments.clone(),
            delay,
        }),
        Arc::new(assets.clone()),
        Arc::new(SimulatedRequestCodec),
        config,
    );
    TestHub {
        hub,
        store,
        payments,
        assets,
    }
}

impl TestHub {
    /// Credits `amount` to the user's current account through a settled incoming invoice.
    pub async fn fund(&self, user: UserId, amount: i64) {
        let invoice = self
            .hub
            .invoices
            .create_incoming(user, amount, "deposit", None)
            .await
            .unwrap();
        self.hub.invoices.settle_incoming(invoice.id).await.unwrap();
    }

    /// An `initialized` outgoing invoice for a payable remote request.
    pub async fn outgoing_invoice(&self, user: UserId, amount: i64, memo: &str) -> Invoice {
        let text = self.payments.issue_request(amount, memo).await.unwrap();
        let decoded = self.hub.invoices.decode_payment_request(&text).unwrap();
        self.hub
            .invoices
            .create_outgoing(user, &text, &decoded)
            .await
            .unwrap()
    }

    pub async fn current_balance(&self, user: UserId) -> i64 {
        self.store.balance(user, AccountKind::Current).await.unwrap()
    }

    pub async fn stored_invoice(&self, id: i64) -> Invoice {
        self.store.get_invoice(id).await.unwrap().unwrap()
    }

    pub async fn entry_count(&self, invoice_id: i64) -> usize {
        self.store.entries_for_invoice(invoice_id).await.unwrap().len()
    }
}

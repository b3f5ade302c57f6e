use super::account::{Account, AccountKind, NewEntry, TransactionEntry, UserId};
use super::asset::{Address, AddressKey, AssetBalance, AssetEntry, DecodedAddress, UniverseRoot};
use super::invoice::{
    DecodedPaymentRequest, Invoice, InvoiceDirection, InvoiceState, Network, NewInvoice,
};
use crate::error::{ClientError, StoreError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Relational ledger holding accounts, entries, invoices, addresses and asset entries.
///
/// Implementations must reject any entry that would leave an account's derived
/// balance negative with `StoreError::BalanceViolation`, both when the entry is
/// staged and again when its transaction commits.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the user's account of `kind`, creating it on first use.
    async fn account_for(&self, user: UserId, kind: AccountKind) -> StoreResult<Account>;
    async fn balance(&self, user: UserId, kind: AccountKind) -> StoreResult<i64>;
    async fn users(&self) -> StoreResult<Vec<UserId>>;

    async fn insert_invoice(&self, invoice: NewInvoice) -> StoreResult<Invoice>;
    /// Compare-and-set on `invoice.version`; returns the stored row with the bumped version.
    async fn update_invoice(&self, invoice: &Invoice) -> StoreResult<Invoice>;
    async fn get_invoice(&self, id: i64) -> StoreResult<Option<Invoice>>;
    /// An empty hash matches nothing.
    async fn find_invoice_by_payment_hash(
        &self,
        user: UserId,
        payment_hash: &str,
    ) -> StoreResult<Option<Invoice>>;
    async fn invoices_in_state(
        &self,
        direction: InvoiceDirection,
        state: InvoiceState,
    ) -> StoreResult<Vec<Invoice>>;
    async fn entries_for_invoice(&self, invoice_id: i64) -> StoreResult<Vec<TransactionEntry>>;

    /// Opens a transaction; dropping it without `commit` discards its writes.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>>;

    async fn find_address(&self, key: &AddressKey) -> StoreResult<Option<Address>>;
    /// Fails with `UniqueViolation` if an address for `key` already exists.
    async fn insert_address(&self, key: &AddressKey, encoded: &str) -> StoreResult<Address>;

    /// Appends an asset movement; fails with `BalanceViolation` if the
    /// resulting asset balance would be negative.
    async fn insert_asset_entry(
        &self,
        user: UserId,
        asset_id: &str,
        delta: i64,
    ) -> StoreResult<AssetEntry>;
    async fn asset_balance(&self, user: UserId, asset_id: &str) -> StoreResult<i64>;
}

#[async_trait]
pub trait LedgerTransaction: Send {
    async fn insert_entry(&mut self, entry: NewEntry) -> StoreResult<TransactionEntry>;
    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<Invoice>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendPaymentRequest {
    pub payment_request: String,
    pub amount: i64,
    pub fee_limit_percent: Decimal,
}

/// Outcome of a payment attempt that reached the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendPaymentResponse {
    pub preimage: Option<Vec<u8>>,
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddInvoiceRequest {
    pub memo: String,
    pub amount: i64,
    pub preimage: [u8; 32],
    pub expiry_secs: u64,
    pub description_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddInvoiceResponse {
    pub payment_request: String,
    pub payment_hash: Vec<u8>,
    pub add_index: u64,
}

/// What the payment network knows about a previously sent payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded { preimage: Vec<u8> },
    Failed { reason: String },
    InFlight,
    /// The network has no payment to this hash; nothing was sent.
    NotFound,
    /// The network answered but the outcome cannot be determined yet.
    Unknown,
}

#[async_trait]
pub trait PaymentNetworkClient: Send + Sync {
    async fn send_payment(&self, request: SendPaymentRequest) -> ClientResult<SendPaymentResponse>;
    async fn add_invoice(&self, request: AddInvoiceRequest) -> ClientResult<AddInvoiceResponse>;
    async fn payment_status(&self, payment_hash: &str) -> ClientResult<PaymentStatus>;
    /// Hex of this node's identity public key.
    fn identity_pubkey(&self) -> String;
}

#[async_trait]
pub trait AssetNetworkClient: Send + Sync {
    async fn new_address(&self, asset_id: &[u8], amount: u64) -> ClientResult<String>;
    async fn decode_address(&self, encoded: &str) -> ClientResult<DecodedAddress>;
    async fn send_asset(&self, addresses: Vec<String>) -> ClientResult<()>;
    /// Balances grouped by asset id.
    async fn list_balances(&self) -> ClientResult<Vec<AssetBalance>>;
    async fn list_universe_roots(&self) -> ClientResult<Vec<UniverseRoot>>;
}

/// Codec for payment-request text.
pub trait PaymentRequestDecoder: Send + Sync {
    fn decode(&self, text: &str, network: Network) -> ClientResult<DecodedPaymentRequest>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PaymentClientRef = Arc<dyn PaymentNetworkClient>;
pub type AssetClientRef = Arc<dyn AssetNetworkClient>;
pub type DecoderRef = Arc<dyn PaymentRequestDecoder>;

use crate::config::HubConfig;
use crate::domain::account::{AccountKind, NewEntry, TransactionEntry, UserId};
use crate::domain::invoice::{
    DecodedPaymentRequest, Invoice, InvoiceDirection, InvoiceState, Network, NewInvoice,
};
use crate::domain::ports::{AddInvoiceRequest, DecoderRef, LedgerStoreRef, PaymentClientRef};
use crate::error::{HubError, Result, StoreError};
use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;

/// Creates and mutates invoice records.
pub struct InvoiceService {
    store: LedgerStoreRef,
    payments: PaymentClientRef,
    decoder: DecoderRef,
    config: HubConfig,
}

impl InvoiceService {
    pub fn new(
        store: LedgerStoreRef,
        payments: PaymentClientRef,
        decoder: DecoderRef,
        config: HubConfig,
    ) -> Self {
        Self {
            store,
            payments,
            decoder,
            config,
        }
    }

    /// Decodes payment-request text for the network its prefix names.
    ///
    /// Requests for a network other than the configured one are rejected.
    pub fn decode_payment_request(&self, text: &str) -> Result<DecodedPaymentRequest> {
        let network = Network::from_payment_request(text)
            .ok_or_else(|| HubError::Decode("payment request too short".to_string()))?;
        if network != self.config.network {
            return Err(HubError::Decode(format!(
                "payment request is for {network}, hub runs on {}",
                self.config.network
            )));
        }
        self.decoder
            .decode(text, network)
            .map_err(|e| HubError::Decode(e.to_string()))
    }

    /// Persists an outgoing invoice in state `initialized`.
    pub async fn create_outgoing(
        &self,
        user: UserId,
        payment_request: &str,
        decoded: &DecodedPaymentRequest,
    ) -> Result<Invoice> {
        let amount = decoded.amount_sats();
        if amount <= 0 {
            return Err(HubError::Decode(
                "payment request carries no amount".to_string(),
            ));
        }
        let invoice = self
            .store
            .insert_invoice(NewInvoice {
                user,
                direction: InvoiceDirection::Outgoing,
                amount,
                memo: decoded.description.clone().unwrap_or_default(),
                payment_request: payment_request.to_string(),
                payment_hash: decoded.payment_hash.clone(),
                description_hash: decoded.description_hash.clone(),
                destination: Some(decoded.destination.clone()),
            })
            .await
            .map_err(StoreError::on_write)?;

        tracing::info!(user, invoice_id = invoice.id, amount, "outgoing invoice initialized");
        Ok(invoice)
    }

    /// Creates an incoming invoice.
    ///
    /// The row is written before the payment network is contacted, so a record
    /// exists even if the network call never returns. On network failure the
    /// `initialized` row stays behind as evidence of the attempt.
    pub async fn create_incoming(
        &self,
        user: UserId,
        amount: i64,
        memo: &str,
        description_hash: Option<String>,
    ) -> Result<Invoice> {
        if amount < 0 {
            return Err(HubError::Decode("amount must not be negative".to_string()));
        }
        let mut invoice = self
            .store
            .insert_invoice(NewInvoice {
                user,
                direction: InvoiceDirection::Incoming,
                amount,
                memo: memo.to_string(),
                payment_request: String::new(),
                payment_hash: String::new(),
                description_hash: description_hash.clone(),
                destination: None,
            })
            .await
            .map_err(StoreError::on_write)?;

        let preimage = make_preimage();
        let created = self
            .payments
            .add_invoice(AddInvoiceRequest {
                memo: memo.to_string(),
                amount,
                preimage,
                expiry_secs: self.config.invoice_expiry_secs,
                description_hash,
            })
            .await
            .map_err(|e| {
                tracing::warn!(user, invoice_id = invoice.id, error = %e, "incoming invoice left initialized");
                HubError::Network(e.to_string())
            })?;

        invoice.payment_request = created.payment_request;
        invoice.payment_hash = hex::encode(&created.payment_hash);
        invoice.add_index = Some(created.add_index);
        invoice.destination = Some(self.payments.identity_pubkey());
        invoice.preimage = Some(hex::encode(preimage));
        invoice.state = InvoiceState::Created;

        let invoice = self.store.update_invoice(&invoice).await.map_err(|e| {
            tracing::error!(
                user,
                invoice_id = invoice.id,
                payment_hash = %invoice.payment_hash,
                error = %e,
                "invoice exists on the network but could not be recorded"
            );
            e.on_write()
        })?;

        tracing::info!(user, invoice_id = invoice.id, amount, "incoming invoice created");
        Ok(invoice)
    }

    pub async fn find_by_payment_hash(
        &self,
        user: UserId,
        payment_hash: &str,
    ) -> Result<Option<Invoice>> {
        // Orphaned rows carry an empty hash.
        if payment_hash.is_empty() {
            return Ok(None);
        }
        self.store
            .find_invoice_by_payment_hash(user, payment_hash)
            .await
            .map_err(StoreError::on_read)
    }

    /// Credits the user for a paid incoming invoice.
    ///
    /// Called by the inbound payment notification collaborator. Moves the
    /// invoice from `created` to `settled` and writes exactly one entry
    /// (debit `incoming`, credit `current`) in the same transaction.
    pub async fn settle_incoming(&self, invoice_id: i64) -> Result<TransactionEntry> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await
            .map_err(StoreError::on_read)?
            .ok_or_else(|| HubError::Storage(format!("invoice {invoice_id} not found")))?;
        if invoice.direction != InvoiceDirection::Incoming || invoice.state != InvoiceState::Created
        {
            return Err(HubError::Conflict(format!(
                "invoice {invoice_id} is not an open incoming invoice"
            )));
        }

        let debit = self
            .store
            .account_for(invoice.user, AccountKind::Incoming)
            .await
            .map_err(StoreError::on_write)?;
        let credit = self
            .store
            .account_for(invoice.user, AccountKind::Current)
            .await
            .map_err(StoreError::on_write)?;

        let mut tx = self.store.begin().await.map_err(StoreError::on_write)?;
        let entry = tx
            .insert_entry(NewEntry {
                user: invoice.user,
                debit,
                credit,
                amount: invoice.amount,
                invoice_id: Some(invoice.id),
            })
            .await
            .map_err(StoreError::on_write)?;

        let mut settled = invoice;
        settled.state = InvoiceState::Settled;
        settled.settled_at = Some(Utc::now());
        tx.update_invoice(&settled)
            .await
            .map_err(StoreError::on_write)?;
        tx.commit().await.map_err(StoreError::on_write)?;

        tracing::info!(user = settled.user, invoice_id, amount = entry.amount, "incoming invoice settled");
        Ok(entry)
    }
}

/// Fresh 32-byte preimage from the operating system's CSPRNG.
fn make_preimage() -> [u8; 32] {
    let mut preimage = [0u8; 32];
    OsRng.fill_bytes(&mut preimage);
    preimage
}

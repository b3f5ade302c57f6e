use crate::config::HubConfig;
use crate::domain::account::{Account, AccountKind, NewEntry, TransactionEntry, UserBalances, UserId};
use crate::domain::invoice::{Invoice, InvoiceDirection, InvoiceState};
use crate::domain::ports::{
    LedgerStoreRef, LedgerTransaction, PaymentClientRef, PaymentStatus, SendPaymentRequest,
};
use crate::error::{HubError, Result, StoreError};
use chrono::Utc;

/// How far a failed saga got before failing.
enum SagaFailure {
    /// Nothing reached the network, or the network definitely did not pay.
    Clean(HubError),
    /// The network reported a payment but the ledger could not record it.
    AfterSend(HubError),
}

/// Outcome of one [`SettlementEngine::reconcile_pending`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub settled: Vec<i64>,
    pub reverted: Vec<i64>,
    pub still_pending: Vec<i64>,
}

/// Executes outgoing payments against the ledger and the payment network.
pub struct SettlementEngine {
    store: LedgerStoreRef,
    payments: PaymentClientRef,
    config: HubConfig,
}

impl SettlementEngine {
    pub fn new(store: LedgerStoreRef, payments: PaymentClientRef, config: HubConfig) -> Self {
        Self {
            store,
            payments,
            config,
        }
    }

    /// Pays an `initialized` outgoing invoice.
    ///
    /// The debit entry is staged in an open store transaction while the network
    /// call runs; the store's balance constraint is the only funds check. On
    /// success `invoice` is updated to its settled row. On a clean failure it is
    /// back in `initialized` and nothing was debited. If the network paid but the
    /// ledger write failed, the invoice is left `pending` for
    /// [`reconcile_pending`](Self::reconcile_pending).
    ///
    /// Never retried here: retrying a payment of uncertain outcome can pay twice.
    pub async fn pay(&self, invoice: &mut Invoice) -> Result<TransactionEntry> {
        if invoice.direction != InvoiceDirection::Outgoing
            || invoice.state != InvoiceState::Initialized
        {
            return Err(HubError::Conflict(format!(
                "invoice {} is not an unpaid outgoing invoice",
                invoice.id
            )));
        }

        let debit = self
            .store
            .account_for(invoice.user, AccountKind::Current)
            .await
            .map_err(StoreError::on_write)?;
        let credit = self
            .store
            .account_for(invoice.user, AccountKind::Outgoing)
            .await
            .map_err(StoreError::on_write)?;

        // Durable intent; a concurrent pay of the same invoice loses here.
        let mut intent = invoice.clone();
        intent.state = InvoiceState::Pending;
        let pending = self
            .store
            .update_invoice(&intent)
            .await
            .map_err(StoreError::on_write)?;
        *invoice = pending.clone();

        match self.execute(&pending, debit, credit).await {
            Ok((entry, settled)) => {
                tracing::info!(
                    user = settled.user,
                    invoice_id = settled.id,
                    amount = entry.amount,
                    "outgoing payment settled"
                );
                *invoice = settled;
                Ok(entry)
            }
            Err(SagaFailure::Clean(err)) => {
                tracing::warn!(invoice_id = pending.id, error = %err, "payment rolled back");
                if let Some(released) = self.release(&pending).await {
                    *invoice = released;
                }
                Err(err)
            }
            Err(SagaFailure::AfterSend(err)) => {
                tracing::error!(
                    invoice_id = pending.id,
                    payment_hash = %pending.payment_hash,
                    error = %err,
                    "payment sent but not recorded; invoice left pending"
                );
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        invoice: &Invoice,
        debit: Account,
        credit: Account,
    ) -> std::result::Result<(TransactionEntry, Invoice), SagaFailure> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| SagaFailure::Clean(e.on_write()))?;

        let entry = match tx.insert_entry(new_entry(invoice, debit, credit)).await {
            Ok(entry) => entry,
            Err(err) => return Err(rollback(tx, SagaFailure::Clean(err.on_write())).await),
        };

        let request = SendPaymentRequest {
            payment_request: invoice.payment_request.clone(),
            amount: invoice.amount,
            fee_limit_percent: self.config.fee_limit_percent,
        };
        tracing::debug!(
            invoice_id = invoice.id,
            fee_limit_sats = self.config.fee_limit_sats(invoice.amount),
            "sending payment"
        );
        let response = match self.payments.send_payment(request).await {
            Ok(response) => response,
            Err(err) => {
                let failure = SagaFailure::Clean(HubError::Network(err.to_string()));
                return Err(rollback(tx, failure).await);
            }
        };

        let payment_error = response.payment_error.filter(|reason| !reason.is_empty());
        let preimage = match (payment_error, response.preimage) {
            (None, Some(preimage)) => preimage,
            (reason, _) => {
                let reason = reason.unwrap_or_else(|| "no preimage returned".to_string());
                let failure = SagaFailure::Clean(HubError::PaymentFailed(reason));
                return Err(rollback(tx, failure).await);
            }
        };

        let settled = match tx.update_invoice(&settled(invoice, &preimage)).await {
            Ok(settled) => settled,
            Err(err) => return Err(rollback(tx, SagaFailure::AfterSend(err.on_write())).await),
        };
        tx.commit()
            .await
            .map_err(|e| SagaFailure::AfterSend(e.on_write()))?;
        Ok((entry, settled))
    }

    /// Returns a pending invoice to `initialized`.
    async fn release(&self, pending: &Invoice) -> Option<Invoice> {
        let mut released = pending.clone();
        released.state = InvoiceState::Initialized;
        match self.store.update_invoice(&released).await {
            Ok(released) => Some(released),
            Err(err) => {
                tracing::warn!(invoice_id = pending.id, error = %err, "could not release pending invoice");
                None
            }
        }
    }

    /// Resolves outgoing invoices left `pending` by asking the network what
    /// happened to each payment.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let pending = self
            .store
            .invoices_in_state(InvoiceDirection::Outgoing, InvoiceState::Pending)
            .await
            .map_err(StoreError::on_read)?;

        let mut report = ReconcileReport::default();
        for invoice in pending {
            let status = self
                .payments
                .payment_status(&invoice.payment_hash)
                .await
                .map_err(|e| HubError::Network(e.to_string()))?;

            match status {
                PaymentStatus::Succeeded { preimage } => {
                    match self.record_settlement(&invoice, &preimage).await {
                        Ok(_) => report.settled.push(invoice.id),
                        Err(err) => {
                            tracing::error!(invoice_id = invoice.id, error = %err, "could not record reconciled payment");
                            report.still_pending.push(invoice.id);
                        }
                    }
                }
                PaymentStatus::Failed { reason } => {
                    tracing::info!(invoice_id = invoice.id, %reason, "pending payment failed on the network");
                    match self.release(&invoice).await {
                        Some(_) => report.reverted.push(invoice.id),
                        None => report.still_pending.push(invoice.id),
                    }
                }
                // Intent recorded but never sent, e.g. a release that failed after a clean rollback.
                PaymentStatus::NotFound => match self.release(&invoice).await {
                    Some(_) => report.reverted.push(invoice.id),
                    None => report.still_pending.push(invoice.id),
                },
                PaymentStatus::InFlight | PaymentStatus::Unknown => {
                    report.still_pending.push(invoice.id)
                }
            }
        }
        Ok(report)
    }

    async fn record_settlement(&self, invoice: &Invoice, preimage: &[u8]) -> Result<Invoice> {
        let debit = self
            .store
            .account_for(invoice.user, AccountKind::Current)
            .await
            .map_err(StoreError::on_write)?;
        let credit = self
            .store
            .account_for(invoice.user, AccountKind::Outgoing)
            .await
            .map_err(StoreError::on_write)?;

        let mut tx = self.store.begin().await.map_err(StoreError::on_write)?;
        tx.insert_entry(new_entry(invoice, debit, credit))
            .await
            .map_err(StoreError::on_write)?;
        let settled = tx
            .update_invoice(&settled(invoice, preimage))
            .await
            .map_err(StoreError::on_write)?;
        tx.commit().await.map_err(StoreError::on_write)?;
        Ok(settled)
    }

    /// Derived balances of the user's three accounts.
    pub async fn balances(&self, user: UserId) -> Result<UserBalances> {
        let mut balances = UserBalances {
            user,
            ..UserBalances::default()
        };
        for kind in AccountKind::ALL {
            let amount = self
                .store
                .balance(user, kind)
                .await
                .map_err(StoreError::on_read)?;
            match kind {
                AccountKind::Current => balances.current = amount,
                AccountKind::Incoming => balances.incoming = amount,
                AccountKind::Outgoing => balances.outgoing = amount,
            }
        }
        Ok(balances)
    }
}

fn new_entry(invoice: &Invoice, debit: Account, credit: Account) -> NewEntry {
    NewEntry {
        user: invoice.user,
        debit,
        credit,
        amount: invoice.amount,
        invoice_id: Some(invoice.id),
    }
}

fn settled(invoice: &Invoice, preimage: &[u8]) -> Invoice {
    let mut settled = invoice.clone();
    settled.preimage = Some(hex::encode(preimage));
    settled.state = InvoiceState::Settled;
    settled.settled_at = Some(Utc::now());
    settled
}

async fn rollback(tx: Box<dyn LedgerTransaction>, failure: SagaFailure) -> SagaFailure {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
    failure
}

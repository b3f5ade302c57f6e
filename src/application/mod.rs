//! Application layer: the settlement sagas and asset coordination.
//!
//! [`Hub`] wires the services to one store and one set of network clients.
//! Each call is an independent unit of work; the only serialization point is
//! the store's transaction boundary.

pub mod addresses;
pub mod invoices;
pub mod reports;
pub mod settlement;
pub mod transfers;

use crate::config::HubConfig;
use crate::domain::ports::{AssetClientRef, DecoderRef, LedgerStoreRef, PaymentClientRef};
use addresses::AddressResolver;
use invoices::InvoiceService;
use reports::Reporter;
use settlement::SettlementEngine;
use transfers::TransferCoordinator;

pub struct Hub {
    pub invoices: InvoiceService,
    pub settlement: SettlementEngine,
    pub addresses: AddressResolver,
    pub transfers: TransferCoordinator,
    pub reports: Reporter,
}

impl Hub {
    pub fn new(
        store: LedgerStoreRef,
        payments: PaymentClientRef,
        assets: AssetClientRef,
        decoder: DecoderRef,
        config: HubConfig,
    ) -> Self {
        Self {
            invoices: InvoiceService::new(
                store.clone(),
                payments.clone(),
                decoder,
                config.clone(),
            ),
            settlement: SettlementEngine::new(store.clone(), payments, config),
            addresses: AddressResolver::new(store.clone(), assets.clone()),
            transfers: TransferCoordinator::new(store, assets.clone()),
            reports: Reporter::new(assets),
        }
    }
}

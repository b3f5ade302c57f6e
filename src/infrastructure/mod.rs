//! Adapters for the ledger store and the external network clients.

pub mod in_memory;
mod reservations;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;

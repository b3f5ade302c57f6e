//! Domain layer: ledger entities and the ports the hub talks to.

pub mod account;
pub mod asset;
pub mod invoice;
pub mod ports;

//! Text relay boundary.
//!
//! The messaging surface only understands a status line plus a success flag.
//! Services return structured results; they are rendered here and nowhere else.

use crate::application::Hub;
use crate::domain::account::UserId;
use crate::domain::asset::{Address, AssetBalance, DecodedAddress, UniverseRoot};
use crate::error::{HubError, Result};

pub type RelayMessage = (String, bool);

pub fn balances_message(result: Result<Vec<AssetBalance>>) -> RelayMessage {
    match result {
        Err(_) => ("error: failed to fetch balances.".to_string(), false),
        Ok(balances) if balances.is_empty() => ("balance: 0".to_string(), false),
        Ok(balances) => {
            let body: String = balances
                .iter()
                .map(|b| format!("{} {},", b.asset_name, b.amount))
                .collect();
            (format!("balances: {body}"), true)
        }
    }
}

pub fn catalog_message(result: Result<Vec<UniverseRoot>>) -> RelayMessage {
    match result {
        Err(_) => (
            "error: no assets found, possible disconnect.".to_string(),
            false,
        ),
        Ok(roots) => {
            let body: String = roots
                .iter()
                .map(|r| format!("{} {},", r.asset_id, r.asset_name))
                .collect();
            (format!("uniassets: {body}"), true)
        }
    }
}

pub fn address_message(result: Result<Address>) -> RelayMessage {
    match result {
        Ok(address) => (format!("address: {}", address.encoded), true),
        Err(HubError::Decode(_)) => ("error: failed to parse assetID.".to_string(), false),
        Err(HubError::Network(_)) => (
            "error: failed to create receive address.".to_string(),
            false,
        ),
        Err(HubError::Persistence(_)) => {
            ("error: failed to save receive address.".to_string(), false)
        }
        Err(_) => (
            "error: failed to check on existing address.".to_string(),
            false,
        ),
    }
}

pub fn minted_address_message(result: Result<String>) -> RelayMessage {
    match result {
        Ok(encoded) => (format!("address: {encoded}"), true),
        Err(HubError::Decode(_)) => ("error: failed to parse assetID.".to_string(), false),
        Err(_) => (
            "error: failed to create receive address.".to_string(),
            false,
        ),
    }
}

pub fn transfer_message(result: Result<DecodedAddress>) -> RelayMessage {
    match result {
        Ok(_) => ("success: asset sent.".to_string(), true),
        Err(HubError::Decode(_)) => ("error: failed to decode address.".to_string(), false),
        Err(HubError::InsufficientBalance) => ("error: insufficient funds.".to_string(), false),
        Err(_) => ("error: failed to send asset.".to_string(), false),
    }
}

/// Relay-facing entry points over a [`Hub`].
pub struct Relay<'a> {
    hub: &'a Hub,
}

impl<'a> Relay<'a> {
    pub fn new(hub: &'a Hub) -> Self {
        Self { hub }
    }

    pub async fn balance_by_asset(&self) -> RelayMessage {
        balances_message(self.hub.reports.aggregate_balances().await)
    }

    pub async fn universe_assets(&self) -> RelayMessage {
        catalog_message(self.hub.reports.list_catalog_assets().await)
    }

    pub async fn asset_address(&self, user: UserId, asset_id: &str, amount: u64) -> RelayMessage {
        address_message(
            self.hub
                .addresses
                .resolve_or_create(user, asset_id, amount)
                .await,
        )
    }

    /// `asset_id` is base64; the address is not stored against any user.
    pub async fn address_by_asset_id(&self, asset_id: &str, amount: u64) -> RelayMessage {
        minted_address_message(self.hub.addresses.mint_unrecorded(asset_id, amount).await)
    }

    pub async fn transfer_assets(&self, user: UserId, address: &str) -> RelayMessage {
        transfer_message(self.hub.transfers.transfer(user, address).await)
    }
}

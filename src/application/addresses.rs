use crate::domain::account::UserId;
use crate::domain::asset::{Address, AddressKey};
use crate::domain::ports::{AssetClientRef, LedgerStoreRef};
use crate::error::{HubError, Result, StoreError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Finds or mints per-user asset receive addresses.
pub struct AddressResolver {
    store: LedgerStoreRef,
    assets: AssetClientRef,
}

impl AddressResolver {
    pub fn new(store: LedgerStoreRef, assets: AssetClientRef) -> Self {
        Self { store, assets }
    }

    /// Returns the address for `(user, asset_id, amount)`, minting one on first use.
    ///
    /// `asset_id` is hex. An existing address is returned without contacting the
    /// asset network. If a concurrent resolution inserts the same key first, its
    /// row is returned instead of a second address.
    pub async fn resolve_or_create(
        &self,
        user: UserId,
        asset_id: &str,
        amount: u64,
    ) -> Result<Address> {
        let key = AddressKey::new(user, asset_id.to_ascii_lowercase(), amount);
        if let Some(existing) = self
            .store
            .find_address(&key)
            .await
            .map_err(StoreError::on_read)?
        {
            tracing::debug!(user, asset_id, amount, "reusing receive address");
            return Ok(existing);
        }

        let raw = decode_asset_id(asset_id)?;
        let encoded = self
            .assets
            .new_address(&raw, amount)
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;

        match self.store.insert_address(&key, &encoded).await {
            Ok(address) => {
                tracing::info!(user, asset_id, amount, "receive address created");
                Ok(address)
            }
            Err(StoreError::UniqueViolation(_)) => {
                tracing::debug!(user, asset_id, amount, "lost address race, re-reading");
                self.store
                    .find_address(&key)
                    .await
                    .map_err(StoreError::on_read)?
                    .ok_or_else(|| {
                        HubError::Persistence("address vanished after unique violation".to_string())
                    })
            }
            Err(err) => Err(err.on_write()),
        }
    }

    /// Mints a fresh address for a base64 `asset_id` without recording it.
    ///
    /// Every call contacts the asset network and returns a new address.
    pub async fn mint_unrecorded(&self, asset_id: &str, amount: u64) -> Result<String> {
        let raw = STANDARD
            .decode(asset_id)
            .map_err(|e| HubError::Decode(format!("asset id: {e}")))?;
        if raw.is_empty() {
            return Err(HubError::Decode("asset id is empty".to_string()));
        }
        let encoded = self
            .assets
            .new_address(&raw, amount)
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;
        tracing::debug!(asset_id = %hex::encode(&raw), amount, "unrecorded address minted");
        Ok(encoded)
    }
}

fn decode_asset_id(asset_id: &str) -> Result<Vec<u8>> {
    let raw = hex::decode(asset_id).map_err(|e| HubError::Decode(format!("asset id: {e}")))?;
    if raw.is_empty() {
        return Err(HubError::Decode("asset id is empty".to_string()));
    }
    Ok(raw)
}

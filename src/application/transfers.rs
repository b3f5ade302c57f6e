use crate::domain::account::UserId;
use crate::domain::asset::{AssetEntry, DecodedAddress};
use crate::domain::ports::{AssetClientRef, LedgerStoreRef};
use crate::error::{HubError, Result, StoreError};

/// Validates and submits outbound asset sends.
pub struct TransferCoordinator {
    store: LedgerStoreRef,
    assets: AssetClientRef,
}

impl TransferCoordinator {
    pub fn new(store: LedgerStoreRef, assets: AssetClientRef) -> Self {
        Self { store, assets }
    }

    /// Sends to `encoded_address` on behalf of `user`.
    ///
    /// Nothing is submitted unless the user's asset ledger covers the amount the
    /// address asks for. The ledger itself is not touched; the send is recorded
    /// by the notification collaborator through [`record_asset_movement`](Self::record_asset_movement).
    ///
    /// The balance check reserves nothing: concurrent transfers for the same
    /// user can each pass it before either movement is recorded.
    pub async fn transfer(&self, user: UserId, encoded_address: &str) -> Result<DecodedAddress> {
        let destination = self
            .assets
            .decode_address(encoded_address)
            .await
            .map_err(HubError::from)?;

        let held = self
            .store
            .asset_balance(user, &destination.asset_id)
            .await
            .map_err(StoreError::on_read)?;
        if held < 0 || (held as u64) < destination.amount {
            tracing::warn!(
                user,
                asset_id = %destination.asset_id,
                held,
                requested = destination.amount,
                "asset transfer refused"
            );
            return Err(HubError::InsufficientBalance);
        }

        self.assets
            .send_asset(vec![encoded_address.to_string()])
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;

        tracing::info!(
            user,
            asset_id = %destination.asset_id,
            amount = destination.amount,
            "asset transfer submitted"
        );
        Ok(destination)
    }

    /// Appends a confirmed asset receipt (positive) or send (negative) to the user's asset ledger.
    pub async fn record_asset_movement(
        &self,
        user: UserId,
        asset_id: &str,
        delta: i64,
    ) -> Result<AssetEntry> {
        self.store
            .insert_asset_entry(user, &asset_id.to_ascii_lowercase(), delta)
            .await
            .map_err(StoreError::on_write)
    }
}

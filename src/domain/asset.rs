use super::account::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reusable receive address for `amount` units of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub user: UserId,
    /// Hex-encoded asset identifier.
    pub asset_id: String,
    pub amount: u64,
    pub encoded: String,
    pub created_at: DateTime<Utc>,
}

/// Key an address is resolved by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressKey {
    pub user: UserId,
    pub asset_id: String,
    pub amount: u64,
}

impl AddressKey {
    pub fn new(user: UserId, asset_id: impl Into<String>, amount: u64) -> Self {
        Self {
            user,
            asset_id: asset_id.into(),
            amount,
        }
    }
}

/// Append-only movement of an asset in or out of a user's holdings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub id: i64,
    pub user: UserId,
    pub asset_id: String,
    /// Positive for receipts, negative for sends.
    pub delta: i64,
    pub created_at: DateTime<Utc>,
}

/// Destination of an asset send, as decoded by the asset network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedAddress {
    pub asset_id: String,
    pub amount: u64,
}

/// One balance row as returned by the asset network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset_id: String,
    pub asset_name: String,
    pub amount: u64,
}

/// Catalog entry for a known asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseRoot {
    pub asset_id: String,
    pub asset_name: String,
}

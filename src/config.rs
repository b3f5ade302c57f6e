use crate::domain::invoice::Network;
use crate::error::{HubError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

/// Tunables of the settlement core.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Routing fee ceiling as a percentage of the payment amount.
    pub fee_limit_percent: Decimal,
    /// Validity window of incoming invoices.
    pub invoice_expiry_secs: u64,
    /// Network payment requests must be encoded for.
    pub network: Network,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            fee_limit_percent: dec!(2),
            invoice_expiry_secs: 24 * 3600,
            network: Network::Mainnet,
        }
    }
}

impl HubConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            HubError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let config: HubConfig =
            serde_json::from_str(&raw).map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()
    }

    pub fn validate(self) -> Result<Self> {
        if self.fee_limit_percent < Decimal::ZERO || self.fee_limit_percent > dec!(100) {
            return Err(HubError::Config(format!(
                "fee_limit_percent must be within 0..=100, got {}",
                self.fee_limit_percent
            )));
        }
        if self.invoice_expiry_secs == 0 {
            return Err(HubError::Config(
                "invoice_expiry_secs must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    /// Maximum routing fee for `amount`, rounded down to whole units.
    pub fn fee_limit_sats(&self, amount: i64) -> i64 {
        (Decimal::from(amount) * self.fee_limit_percent / dec!(100))
            .floor()
            .to_i64()
            .unwrap_or(0)
    }
}

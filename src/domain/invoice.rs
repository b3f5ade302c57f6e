use super::account::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceDirection {
    Incoming,
    Outgoing,
}

/// Lifecycle of an invoice.
///
/// Outgoing: `Initialized -> Pending -> Settled`, any failed attempt returns to `Initialized`.
/// Incoming: `Initialized -> Created -> Settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    Initialized,
    Pending,
    Created,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub user: UserId,
    pub direction: InvoiceDirection,
    pub amount: i64,
    pub memo: String,
    pub payment_request: String,
    pub payment_hash: String,
    pub description_hash: Option<String>,
    pub destination: Option<String>,
    pub preimage: Option<String>,
    pub add_index: Option<u64>,
    pub state: InvoiceState,
    /// Bumped on every persisted update; updates compare-and-set on it.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Fields of an invoice before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub user: UserId,
    pub direction: InvoiceDirection,
    pub amount: i64,
    pub memo: String,
    pub payment_request: String,
    pub payment_hash: String,
    pub description_hash: Option<String>,
    pub destination: Option<String>,
}

impl NewInvoice {
    pub fn into_invoice(self, id: i64, now: DateTime<Utc>) -> Invoice {
        Invoice {
            id,
            user: self.user,
            direction: self.direction,
            amount: self.amount,
            memo: self.memo,
            payment_request: self.payment_request,
            payment_hash: self.payment_hash,
            description_hash: self.description_hash,
            destination: self.destination,
            preimage: None,
            add_index: None,
            state: InvoiceState::Initialized,
            version: 0,
            created_at: now,
            settled_at: None,
        }
    }
}

/// Chain parameters a payment request is encoded for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
    Simnet,
}

impl Network {
    /// Selects the network from the human-readable part of a payment request.
    ///
    /// The two leading characters (`ln`) are skipped; the currency prefix decides.
    /// Returns `None` when the text is too short to carry a prefix.
    pub fn from_payment_request(text: &str) -> Option<Self> {
        let currency = text.get(2..)?;
        let network = if currency.starts_with("bcrt") {
            Network::Regtest
        } else if currency.starts_with("tb") {
            Network::Testnet
        } else if currency.starts_with("sb") {
            Network::Simnet
        } else {
            Network::Mainnet
        };
        Some(network)
    }

    /// Human-readable prefix used when encoding payment requests for this network.
    pub fn hrp(self) -> &'static str {
        match self {
            Network::Mainnet => "lnbc",
            Network::Testnet => "lntb",
            Network::Regtest => "lnbcrt",
            Network::Simnet => "lnsb",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
            Network::Simnet => "simnet",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            "simnet" => Ok(Network::Simnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// Structured view of a payment request, as produced by a `PaymentRequestDecoder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPaymentRequest {
    pub network: Network,
    /// Hex of the compressed destination node key.
    pub destination: String,
    /// Hex of the 32-byte payment hash.
    pub payment_hash: String,
    pub description: Option<String>,
    pub description_hash: Option<String>,
    pub amount_msat: Option<u64>,
}

impl DecodedPaymentRequest {
    /// Amount in ledger units; sub-satoshi remainders are truncated.
    pub fn amount_sats(&self) -> i64 {
        self.amount_msat.map_or(0, |msat| (msat / 1000) as i64)
    }
}

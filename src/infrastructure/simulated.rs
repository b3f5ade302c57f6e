//! Deterministic stand-ins for the payment network, the asset network and the
//! payment-request codec. They back the replay CLI and the test suite, and can
//! be scripted to fail in each of the ways the real clients do.

use crate::domain::asset::{AssetBalance, DecodedAddress, UniverseRoot};
use crate::domain::invoice::{DecodedPaymentRequest, Network};
use crate::domain::ports::{
    AddInvoiceRequest, AddInvoiceResponse, AssetNetworkClient, ClientResult, PaymentNetworkClient,
    PaymentRequestDecoder, PaymentStatus, SendPaymentRequest, SendPaymentResponse,
};
use crate::error::ClientError;
use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Encodes payment requests as `<hrp>1<hex(json)>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedRequestCodec;

impl SimulatedRequestCodec {
    pub fn encode(request: &DecodedPaymentRequest) -> String {
        // Serializing a plain struct of strings and integers cannot fail.
        let body = serde_json::to_vec(request).unwrap_or_default();
        format!("{}1{}", request.network.hrp(), hex::encode(body))
    }
}

impl PaymentRequestDecoder for SimulatedRequestCodec {
    fn decode(&self, text: &str, network: Network) -> ClientResult<DecodedPaymentRequest> {
        if Network::from_payment_request(text) != Some(network) {
            return Err(ClientError::Malformed(format!(
                "payment request is not for {network}"
            )));
        }
        let body = text
            .strip_prefix(network.hrp())
            .and_then(|rest| rest.strip_prefix('1'))
            .ok_or_else(|| ClientError::Malformed("missing separator".to_string()))?;
        let bytes = hex::decode(body).map_err(|e| ClientError::Malformed(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Malformed(e.to_string()))
    }
}

fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Scripted result for the next `send_payment` call.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Respond(SendPaymentResponse),
    Fail(ClientError),
}

#[derive(Default)]
struct PaymentState {
    /// Preimages of every request this network can settle, by payment hash.
    preimages: HashMap<String, Vec<u8>>,
    statuses: HashMap<String, PaymentStatus>,
    scripted_sends: VecDeque<SendOutcome>,
    add_index: u64,
}

/// In-process payment network.
///
/// Requests issued by [`SimulatedPaymentNetwork::issue_request`] or created via
/// `add_invoice` are payable; anything else fails to route.
#[derive(Clone)]
pub struct SimulatedPaymentNetwork {
    network: Network,
    identity: String,
    state: Arc<Mutex<PaymentState>>,
    fail_add_invoice: Arc<AtomicBool>,
    send_calls: Arc<AtomicUsize>,
}

impl SimulatedPaymentNetwork {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            identity: format!("02{}", hex::encode(random_bytes())),
            state: Arc::default(),
            fail_add_invoice: Arc::default(),
            send_calls: Arc::default(),
        }
    }

    /// Issues a payable request for `amount` units from a remote node.
    pub async fn issue_request(&self, amount: i64, memo: &str) -> ClientResult<String> {
        let amount_msat = to_msat(amount)?;
        let preimage = random_bytes();
        let payment_hash = hex::encode(Sha256::digest(preimage));
        let request = DecodedPaymentRequest {
            network: self.network,
            destination: format!("03{}", hex::encode(random_bytes())),
            payment_hash: payment_hash.clone(),
            description: Some(memo.to_string()),
            description_hash: None,
            amount_msat: Some(amount_msat),
        };
        self.state
            .lock()
            .await
            .preimages
            .insert(payment_hash, preimage.to_vec());
        Ok(SimulatedRequestCodec::encode(&request))
    }

    /// Queues the outcome of the next `send_payment` call.
    pub async fn script_send(&self, outcome: SendOutcome) {
        self.state.lock().await.scripted_sends.push_back(outcome);
    }

    /// Overrides what `payment_status` reports for `payment_hash`.
    pub async fn script_status(&self, payment_hash: &str, status: PaymentStatus) {
        self.state
            .lock()
            .await
            .statuses
            .insert(payment_hash.to_string(), status);
    }

    pub fn fail_add_invoice(&self, fail: bool) {
        self.fail_add_invoice.store(fail, Ordering::SeqCst);
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

fn to_msat(amount: i64) -> ClientResult<u64> {
    u64::try_from(amount)
        .ok()
        .and_then(|amount| amount.checked_mul(1000))
        .ok_or_else(|| ClientError::Malformed(format!("invalid amount {amount}")))
}

#[async_trait]
impl PaymentNetworkClient for SimulatedPaymentNetwork {
    async fn send_payment(&self, request: SendPaymentRequest) -> ClientResult<SendPaymentResponse> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let decoded = SimulatedRequestCodec.decode(&request.payment_request, self.network)?;
        let mut state = self.state.lock().await;

        let response = match state.scripted_sends.pop_front() {
            Some(SendOutcome::Fail(err)) => return Err(err),
            Some(SendOutcome::Respond(response)) => response,
            None => match state.preimages.get(&decoded.payment_hash) {
                Some(preimage) => SendPaymentResponse {
                    preimage: Some(preimage.clone()),
                    payment_error: None,
                },
                None => SendPaymentResponse {
                    preimage: None,
                    payment_error: Some("unable to find a path to destination".to_string()),
                },
            },
        };

        let status = match (&response.preimage, &response.payment_error) {
            (Some(preimage), None) => PaymentStatus::Succeeded {
                preimage: preimage.clone(),
            },
            (_, Some(reason)) => PaymentStatus::Failed {
                reason: reason.clone(),
            },
            (None, None) => PaymentStatus::Unknown,
        };
        state.statuses.insert(decoded.payment_hash, status);
        Ok(response)
    }

    async fn add_invoice(&self, request: AddInvoiceRequest) -> ClientResult<AddInvoiceResponse> {
        if self.fail_add_invoice.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("payment node unreachable".to_string()));
        }
        let amount_msat = to_msat(request.amount)?;
        let payment_hash = Sha256::digest(request.preimage).to_vec();
        let encoded = SimulatedRequestCodec::encode(&DecodedPaymentRequest {
            network: self.network,
            destination: self.identity.clone(),
            payment_hash: hex::encode(&payment_hash),
            description: Some(request.memo),
            description_hash: request.description_hash,
            amount_msat: Some(amount_msat),
        });

        let mut state = self.state.lock().await;
        state
            .preimages
            .insert(hex::encode(&payment_hash), request.preimage.to_vec());
        state.add_index += 1;
        Ok(AddInvoiceResponse {
            payment_request: encoded,
            payment_hash,
            add_index: state.add_index,
        })
    }

    async fn payment_status(&self, payment_hash: &str) -> ClientResult<PaymentStatus> {
        let state = self.state.lock().await;
        Ok(state
            .statuses
            .get(payment_hash)
            .cloned()
            .unwrap_or(PaymentStatus::NotFound))
    }

    fn identity_pubkey(&self) -> String {
        self.identity.clone()
    }
}

#[derive(Default)]
struct AssetState {
    addresses: HashMap<String, DecodedAddress>,
    balances: Vec<AssetBalance>,
    roots: Vec<UniverseRoot>,
    sent: Vec<String>,
}

/// In-process asset network.
#[derive(Clone, Default)]
pub struct SimulatedAssetNetwork {
    state: Arc<Mutex<AssetState>>,
    unavailable: Arc<AtomicBool>,
    new_address_calls: Arc<AtomicUsize>,
}

impl SimulatedAssetNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `ClientError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn set_balances(&self, balances: Vec<AssetBalance>) {
        self.state.lock().await.balances = balances;
    }

    pub async fn set_universe_roots(&self, roots: Vec<UniverseRoot>) {
        self.state.lock().await.roots = roots;
    }

    pub async fn sent(&self) -> Vec<String> {
        self.state.lock().await.sent.clone()
    }

    pub fn new_address_calls(&self) -> usize {
        self.new_address_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> ClientResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ClientError::Unavailable("asset node unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AssetNetworkClient for SimulatedAssetNetwork {
    async fn new_address(&self, asset_id: &[u8], amount: u64) -> ClientResult<String> {
        self.check_available()?;
        let call = self.new_address_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let asset_id = hex::encode(asset_id);
        let encoded = format!("tapsim1{asset_id}x{amount}x{call}");
        self.state.lock().await.addresses.insert(
            encoded.clone(),
            DecodedAddress { asset_id, amount },
        );
        Ok(encoded)
    }

    async fn decode_address(&self, encoded: &str) -> ClientResult<DecodedAddress> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .addresses
            .get(encoded)
            .cloned()
            .ok_or_else(|| ClientError::Malformed(format!("unknown address {encoded}")))
    }

    async fn send_asset(&self, addresses: Vec<String>) -> ClientResult<()> {
        self.check_available()?;
        self.state.lock().await.sent.extend(addresses);
        Ok(())
    }

    async fn list_balances(&self) -> ClientResult<Vec<AssetBalance>> {
        self.check_available()?;
        Ok(self.state.lock().await.balances.clone())
    }

    async fn list_universe_roots(&self) -> ClientResult<Vec<UniverseRoot>> {
        self.check_available()?;
        Ok(self.state.lock().await.roots.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_codec_decodes_issued_request() {
        let network = SimulatedPaymentNetwork::new(Network::Regtest);
        let text = network.issue_request(5000, "coffee").await.unwrap();
        assert!(text.starts_with("lnbcrt1"));

        let decoded = SimulatedRequestCodec.decode(&text, Network::Regtest).unwrap();
        assert_eq!(decoded.amount_sats(), 5000);
        assert_eq!(decoded.description.as_deref(), Some("coffee"));
    }

    #[tokio::test]
    async fn test_out_of_range_amounts_are_malformed() {
        let network = SimulatedPaymentNetwork::new(Network::Regtest);
        for amount in [-5, i64::MAX] {
            assert!(matches!(
                network.issue_request(amount, "x").await,
                Err(ClientError::Malformed(_))
            ));
        }
        let request = AddInvoiceRequest {
            memo: "x".to_string(),
            amount: -1,
            preimage: [0; 32],
            expiry_secs: 3600,
            description_hash: None,
        };
        assert!(matches!(
            network.add_invoice(request).await,
            Err(ClientError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unsent_payment_is_not_found() {
        let network = SimulatedPaymentNetwork::new(Network::Regtest);
        assert_eq!(
            network.payment_status(&"00".repeat(32)).await.unwrap(),
            PaymentStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_codec_rejects_wrong_network_and_garbage() {
        let network = SimulatedPaymentNetwork::new(Network::Testnet);
        let text = network.issue_request(1, "x").await.unwrap();
        assert!(matches!(
            SimulatedRequestCodec.decode(&text, Network::Mainnet),
            Err(ClientError::Malformed(_))
        ));
        assert!(matches!(
            SimulatedRequestCodec.decode("lnbc1zz", Network::Mainnet),
            Err(ClientError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_destination_fails_to_route() {
        let network = SimulatedPaymentNetwork::new(Network::Mainnet);
        let other = SimulatedPaymentNetwork::new(Network::Mainnet);
        let text = other.issue_request(10, "elsewhere").await.unwrap();

        let response = network
            .send_payment(SendPaymentRequest {
                payment_request: text,
                amount: 10,
                fee_limit_percent: rust_decimal::Decimal::TWO,
            })
            .await
            .unwrap();
        assert!(response.preimage.is_none());
        assert!(response.payment_error.is_some());
        assert_eq!(network.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_asset_addresses_decode() {
        let assets = SimulatedAssetNetwork::new();
        let encoded = assets.new_address(&[0xde, 0xad], 7).await.unwrap();
        let decoded = assets.decode_address(&encoded).await.unwrap();
        assert_eq!(decoded.asset_id, "dead");
        assert_eq!(decoded.amount, 7);
        assert_eq!(assets.new_address_calls(), 1);

        assets.set_unavailable(true);
        assert!(matches!(
            assets.list_balances().await,
            Err(ClientError::Unavailable(_))
        ));
    }
}

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by the hub's invoice, settlement and asset operations.
///
/// Adapter failures (`StoreError`, `ClientError`) are mapped into one of these
/// kinds at the call site, depending on whether the failing call was a read,
/// a write, or an external RPC.
#[derive(Error, Diagnostic, Debug)]
pub enum HubError {
    #[error("decode error: {0}")]
    #[diagnostic(code(tahub::decode), help("the input text is malformed; do not retry"))]
    Decode(String),

    #[error("network error: {0}")]
    #[diagnostic(code(tahub::network))]
    Network(String),

    #[error("payment failed: {0}")]
    #[diagnostic(code(tahub::payment_failed))]
    PaymentFailed(String),

    #[error("insufficient balance")]
    #[diagnostic(code(tahub::insufficient_balance))]
    InsufficientBalance,

    #[error("persistence error: {0}")]
    #[diagnostic(code(tahub::persistence))]
    Persistence(String),

    #[error("storage error: {0}")]
    #[diagnostic(code(tahub::storage))]
    Storage(String),

    #[error("conflict: {0}")]
    #[diagnostic(code(tahub::conflict))]
    Conflict(String),

    #[error("configuration error: {0}")]
    #[diagnostic(code(tahub::config))]
    Config(String),
}

impl HubError {
    /// Whether repeating the same call could succeed without new input.
    ///
    /// `Network` is only safe to retry when the caller knows no state-changing
    /// request reached the network.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HubError::Network(_) | HubError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

/// Failures reported by a `LedgerStore` backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("account balance would become negative")]
    BalanceViolation,
    #[error("record was modified concurrently (expected version {expected})")]
    VersionConflict { expected: u32 },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Maps a failed read into the hub's error kinds.
    pub fn on_read(self) -> HubError {
        match self {
            StoreError::BalanceViolation => HubError::InsufficientBalance,
            StoreError::VersionConflict { .. } => HubError::Conflict(self.to_string()),
            other => HubError::Storage(other.to_string()),
        }
    }

    /// Maps a failed write into the hub's error kinds.
    pub fn on_write(self) -> HubError {
        match self {
            StoreError::BalanceViolation => HubError::InsufficientBalance,
            StoreError::VersionConflict { .. } => HubError::Conflict(self.to_string()),
            other => HubError::Persistence(other.to_string()),
        }
    }
}

/// Failures reported by the payment or asset network clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("client unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("malformed input: {0}")]
    Malformed(String),
}

impl From<ClientError> for HubError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Malformed(msg) => HubError::Decode(msg),
            other => HubError::Network(other.to_string()),
        }
    }
}

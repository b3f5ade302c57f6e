use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tahub::application::Hub;
use tahub::config::HubConfig;
use tahub::domain::invoice::Network;
use tahub::domain::ports::LedgerStoreRef;
use tahub::error::HubError;
use tahub::infrastructure::in_memory::InMemoryLedgerStore;
use tahub::infrastructure::simulated::{
    SimulatedAssetNetwork, SimulatedPaymentNetwork, SimulatedRequestCodec,
};
use tahub::interfaces::csv::balance_writer::BalanceWriter;
use tahub::interfaces::csv::command_reader::{Command, CommandReader, CommandType};
use tahub::interfaces::relay::Relay;
use tracing_subscriber::EnvFilter;

/// Replays hub commands against the ledger with simulated payment and asset networks.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file (op, user, amount, memo, target)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Routing fee ceiling as a percentage of the amount
    #[arg(long)]
    fee_limit_percent: Option<Decimal>,

    /// Validity window of incoming invoices, in seconds
    #[arg(long)]
    invoice_expiry_secs: Option<u64>,

    /// mainnet, testnet, regtest or simnet
    #[arg(long)]
    network: Option<Network>,
}

impl Cli {
    fn hub_config(&self) -> tahub::error::Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => HubConfig::from_file(path)?,
            None => HubConfig::default(),
        };
        if let Some(percent) = self.fee_limit_percent {
            config.fee_limit_percent = percent;
        }
        if let Some(expiry) = self.invoice_expiry_secs {
            config.invoice_expiry_secs = expiry;
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        config.validate()
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    use tahub::infrastructure::rocksdb::RocksDbLedgerStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDbLedgerStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

struct Replay {
    hub: Hub,
    payments: SimulatedPaymentNetwork,
}

impl Replay {
    async fn apply(&self, command: Command) -> tahub::error::Result<()> {
        let user = command.user;
        let memo = command.memo.as_deref().unwrap_or_default();
        match command.op {
            CommandType::Fund => {
                let invoice = self
                    .hub
                    .invoices
                    .create_incoming(user, amount(&command)?, memo, None)
                    .await?;
                self.hub.invoices.settle_incoming(invoice.id).await?;
            }
            CommandType::Invoice => {
                let invoice = self
                    .hub
                    .invoices
                    .create_incoming(user, amount(&command)?, memo, None)
                    .await?;
                log_relay(&format!("invoice: {}", invoice.payment_request), true);
            }
            CommandType::Pay => {
                let text = self.payments.issue_request(positive(&command)?, memo).await?;
                let decoded = self.hub.invoices.decode_payment_request(&text)?;
                let mut invoice = self
                    .hub
                    .invoices
                    .create_outgoing(user, &text, &decoded)
                    .await?;
                self.hub.settlement.pay(&mut invoice).await?;
            }
            CommandType::Address => {
                let (message, ok) = Relay::new(&self.hub)
                    .asset_address(user, target(&command)?, unsigned(&command)?)
                    .await;
                log_relay(&message, ok);
            }
            CommandType::MintAddress => {
                let (message, ok) = Relay::new(&self.hub)
                    .address_by_asset_id(target(&command)?, unsigned(&command)?)
                    .await;
                log_relay(&message, ok);
            }
            CommandType::AssetCredit => {
                self.hub
                    .transfers
                    .record_asset_movement(user, target(&command)?, amount(&command)?)
                    .await?;
            }
            CommandType::Transfer => {
                let (message, ok) = Relay::new(&self.hub)
                    .transfer_assets(user, target(&command)?)
                    .await;
                log_relay(&message, ok);
            }
            CommandType::Reconcile => {
                let report = self.hub.settlement.reconcile_pending().await?;
                tracing::info!(
                    settled = report.settled.len(),
                    reverted = report.reverted.len(),
                    pending = report.still_pending.len(),
                    "reconciliation finished"
                );
            }
        }
        Ok(())
    }
}

fn amount(command: &Command) -> tahub::error::Result<i64> {
    command
        .amount
        .ok_or_else(|| HubError::Decode(format!("{:?} requires an amount", command.op)))
}

fn unsigned(command: &Command) -> tahub::error::Result<u64> {
    u64::try_from(amount(command)?)
        .map_err(|_| HubError::Decode("amount must not be negative".to_string()))
}

fn positive(command: &Command) -> tahub::error::Result<i64> {
    match amount(command)? {
        amount if amount > 0 => Ok(amount),
        _ => Err(HubError::Decode("amount must be positive".to_string())),
    }
}

fn target(command: &Command) -> tahub::error::Result<&str> {
    command
        .target
        .as_deref()
        .ok_or_else(|| HubError::Decode(format!("{:?} requires a target", command.op)))
}

fn log_relay(message: &str, ok: bool) {
    tracing::info!(ok, "{message}");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = cli.hub_config()?;
    let store = open_store(cli.db_path.clone())?;

    let payments = SimulatedPaymentNetwork::new(config.network);
    let hub = Hub::new(
        store.clone(),
        Arc::new(payments.clone()),
        Arc::new(SimulatedAssetNetwork::new()),
        Arc::new(SimulatedRequestCodec),
        config,
    );
    let replay = Replay { hub, payments };

    // Process commands
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = replay.apply(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    // Output final balances
    let mut balances = Vec::new();
    for user in store.users().await.into_diagnostic()? {
        balances.push(replay.hub.settlement.balances(user).await?);
    }
    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(balances).into_diagnostic()?;

    Ok(())
}

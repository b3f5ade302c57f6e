use crate::domain::account::UserId;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Simulated inbound payment: create an incoming invoice and settle it.
    Fund,
    Invoice,
    Pay,
    Address,
    /// Address for a base64 asset id, not tied to the user.
    MintAddress,
    AssetCredit,
    Transfer,
    Reconcile,
}

/// One row of a replay file: `op, user, amount, memo, target`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Command {
    pub op: CommandType,
    pub user: UserId,
    pub amount: Option<i64>,
    pub memo: Option<String>,
    /// Asset id for `address`/`asset_credit` (base64 for `mint_address`),
    /// encoded address for `transfer`.
    pub target: Option<String>,
}

/// Reads hub commands from a CSV source.
///
/// Wraps `csv::Reader`, trimming whitespace and accepting short rows so that
/// trailing optional columns can be left out.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands; a malformed row yields an error and the
    /// iteration continues with the next row.
    pub fn commands(self) -> impl Iterator<Item = csv::Result<Command>> {
        self.reader.into_deserialize()
    }
}

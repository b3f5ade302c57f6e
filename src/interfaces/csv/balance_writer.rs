use crate::domain::account::UserBalances;
use std::io::Write;

/// Writes per-user derived balances as CSV (`user,current,incoming,outgoing`).
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(sink),
        }
    }

    /// Writes the header followed by one row per user. The header is written
    /// even when there are no users.
    pub fn write_balances(
        &mut self,
        balances: impl IntoIterator<Item = UserBalances>,
    ) -> csv::Result<()> {
        self.writer
            .write_record(["user", "current", "incoming", "outgoing"])?;
        for row in balances {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

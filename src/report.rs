//! Progress table printed while the batch runs

use ethers::types::{H256, U256};
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle of the transaction for one nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Mined,
    Success,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Pending => "Pending",
            Status::Mined => "Mined",
            Status::Success => "Success",
        };
        // pad so the column stays aligned
        f.pad(name)
    }
}

/// One row of the table
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    /// 1-based iteration number
    pub progress: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub status: Status,
    pub tx_hash: H256,
}

/// Writes the progress table, stdout by default
pub struct ProgressLog {
    out: Box<dyn Write + Send>,
    target: u64,
}

impl ProgressLog {
    pub fn stdout(target: u64) -> Self {
        Self::new(Box::new(io::stdout()), target)
    }

    pub fn new(out: Box<dyn Write + Send>, target: u64) -> Self {
        Self { out, target }
    }

    /// Header goes above the first row of iteration 1 and of every 10th iteration,
    /// except the last one
    pub fn needs_header(&self, iteration: u64) -> bool {
        iteration == 0 || ((iteration + 1) % 10 == 0 && iteration + 1 != self.target)
    }

    pub fn started(&mut self) {
        let line = format!("Started at {}.", timestamp());
        self.write_line(&line);
    }

    pub fn header(&mut self, progress: u64) {
        let width = progress.to_string().len();
        let line = format!(
            " {:<width$} | {:<ts$} | {:<7} | {:<10} | {:<7} | Tx hash ",
            "#",
            "Date & Time",
            "Nonce",
            "Gas Price",
            "Status",
            width = width,
            ts = timestamp().len(),
        );
        self.write_line(&line);
    }

    pub fn record(&mut self, entry: &ProgressEntry) {
        info!(
            iteration = entry.progress,
            nonce = entry.nonce,
            gas_price = %entry.gas_price,
            status = %entry.status,
            tx_hash = ?entry.tx_hash,
            "progress"
        );

        let line = format!(
            " {} | {} | {:<7} | {:<10} | {:<7} | 0x{}",
            entry.progress,
            timestamp(),
            entry.nonce,
            entry.gas_price.to_string(),
            entry.status,
            hex::encode(entry.tx_hash.as_bytes()),
        );
        self.write_line(&line);
    }

    pub fn finished(&mut self, count: u64, elapsed: Duration) {
        let line = format!(
            "Finished {} transactions in {}.",
            count,
            format_elapsed(elapsed)
        );
        self.write_line(&line);
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            warn!("Failed to write progress line: {}", e);
        }
    }
}

/// ctime-style local timestamp
fn timestamp() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// `h:mm:ss`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

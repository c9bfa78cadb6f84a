use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xsession")]
#[command(about = "Inspect and maintain XSession edit-session ledgers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Ledger database (defaults to XSESSION_LEDGER_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    pub ledger_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List edit sessions in the ledger
    #[command(alias = "ls")]
    Sessions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Expire sessions idle for longer than the TTL
    Sweep {
        /// Keep sweeping every XSESSION_SWEEP_INTERVAL_SECS until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Evict the current holder of a file's lease
    ///
    /// A service running on the same ledger sees the eviction on its next
    /// operation on the file.
    Release {
        /// File identifier
        file_id: String,
    },
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "BigDB snapshot-guided export", long_about = None)]
pub struct Cli {
    /// Debug logging (RUST_LOG still wins when set)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Account login and game selection.
#[derive(Args)]
pub struct LoginArgs {
    #[arg(long)]
    pub username: String,

    #[arg(long, env = "BDX_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Game identifier whose tables are exported
    #[arg(long)]
    pub game: String,

    /// Root of the mirrored store
    #[arg(long, default_value = "store")]
    pub store: PathBuf,

    /// Name of the temporary access channel
    #[arg(long, default_value = "export")]
    pub channel: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export every record listed in the snapshot archives of a directory
    Export {
        #[command(flatten)]
        login: LoginArgs,

        /// Directory holding <game>_<table>_<database>.zip snapshots
        #[arg(long)]
        archives: PathBuf,

        /// Output root; records land in <out>/<game>/<table>/<database>/
        #[arg(long, default_value = "exports")]
        out: PathBuf,

        /// Failure log (defaults to <out>/errors.log)
        #[arg(long = "error-log")]
        error_log: Option<PathBuf>,

        /// Worker threads; 0 runs one per archive
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Channel poll interval in milliseconds
        #[arg(long = "poll-ms", default_value_t = 1000)]
        poll_ms: u64,

        /// Leave the access channel in place after the export
        #[arg(long = "keep-channel")]
        keep_channel: bool,
    },

    /// Print the record keys found in one snapshot archive
    Scan { archive: PathBuf },

    /// Remove an access channel left behind by an interrupted run
    Cleanup {
        #[command(flatten)]
        login: LoginArgs,
    },
}

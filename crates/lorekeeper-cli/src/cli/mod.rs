use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod args;

pub use args::{EvictionArgs, HistoryArgs, SearchArgs};

#[derive(Debug, Parser)]
#[command(name = "lorekeeper")]
#[command(about = "Lexical vault index with a remote source mirror", version)]
pub struct Cli {
    #[arg(long, default_value = ".lorekeeper")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Rank vault documents against a query.
    Search(SearchArgs),
    /// Mirror every eligible vault document to the remote store.
    Sync,
    /// Rebuild the index from a full vault walk.
    Reindex,
    Status,
    History(HistoryArgs),
    Evictions(EvictionArgs),
}

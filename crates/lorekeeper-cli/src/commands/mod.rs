use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use lorekeeper_core::{CancelFlag, Lorekeeper, QueryOptions};

use crate::cli::Commands;

pub(crate) fn run_from_root(root: &Path, command: Commands) -> Result<()> {
    let keeper = Lorekeeper::new(root).context("failed to open vault")?;

    match command {
        Commands::Search(args) => {
            let mut params = keeper.selection_params();
            if let Some(top_n) = args.top_n {
                params.top_n = top_n;
            }
            if let Some(ratio) = args.cutoff_ratio {
                params.cutoff_ratio = ratio;
            }
            if let Some(min_k) = args.min_k {
                params.min_k = min_k;
            }
            let options = QueryOptions {
                selection: Some(params),
                sync_remote: args.mirror,
                cancel: CancelFlag::new(),
            };
            let outcome = keeper.prepare_query(&args.query, &options)?;
            print_json(&outcome)?;
        }
        Commands::Sync => {
            let report = keeper.sync_all(&CancelFlag::new())?;
            print_json(&report)?;
        }
        Commands::Reindex => {
            keeper.reindex()?;
            print_json(&keeper.status()?)?;
        }
        Commands::Status => {
            print_json(&keeper.status()?)?;
        }
        Commands::History(args) => {
            print_json(&keeper.history(args.limit)?)?;
        }
        Commands::Evictions(args) => {
            print_json(&keeper.evictions(args.limit)?)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

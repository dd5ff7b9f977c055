//! Status subcommand - ledger totals

use anyhow::{Context, Result};
use lawcrawl_core::fmt_num;
use lawcrawl_ledger::WorkLedger;

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let path = &config.paths.ledger;
    if !path.exists() {
        anyhow::bail!("no ledger at {}, run `lawcrawl crawl` first", path.display());
    }
    let ledger = WorkLedger::open(path)
        .with_context(|| format!("cannot open ledger {}", path.display()))?;
    let counts = ledger.counts();
    eprintln!("\n{}", counts.format_table());
    eprintln!(
        "{} URLs to collect, {} to retry, {} files waiting for download",
        fmt_num(ledger.pending_collection_urls().len()),
        fmt_num(ledger.failed_collection_urls().len()),
        fmt_num(ledger.pending_downloads().len())
    );
    ledger.close();
    Ok(())
}

//! Crawl subcommand - collect links, then download documents

use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use lawcrawl_core::{CrawlError, EXIT_INTERRUPTED, SharedProgress, ShutdownCoordinator};
use lawcrawl_crawler::{
    BatchFolderSeeds, ChromeLauncher, Collaborators, ConsolePrompt, CookieSessionProvider,
    CrawlConfig, Crawler, FixedAnswer, HttpFetcher, Prompt, RunMode, StaticLinkExtractor,
};
use lawcrawl_ledger::{ExitSummary, WorkLedger};

use crate::cmd::login;
use crate::config::Config;

/// Exit summaries are appended here, under the log directory
const SUMMARY_LOG: &str = "summary.log";

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,

    /// Collect links only, skip downloads
    #[arg(long, conflicts_with = "download_only")]
    pub collect_only: bool,

    /// Download already collected links only
    #[arg(long)]
    pub download_only: bool,

    /// Page navigation timeout in seconds (30-120)
    #[arg(long)]
    pub page_timeout: Option<u64>,

    /// Number of concurrent browsers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Number of concurrent downloads
    #[arg(long)]
    pub download_workers: Option<usize>,

    /// Retry failed URLs without asking
    #[arg(short, long)]
    pub yes: bool,
}

impl CrawlArgs {
    fn mode(&self) -> RunMode {
        if self.collect_only {
            RunMode::CollectOnly
        } else if self.download_only {
            RunMode::DownloadOnly
        } else {
            RunMode::Full
        }
    }

    /// Apply flag overrides and clamp into supported ranges
    fn apply(&self, mut crawl: CrawlConfig) -> CrawlConfig {
        crawl.browser.headless &= !self.no_headless;
        if let Some(secs) = self.page_timeout {
            crawl.browser.page_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.workers {
            crawl.collect_workers = n;
        }
        if let Some(n) = self.download_workers {
            crawl.download_workers = n;
        }
        crawl.normalized()
    }
}

pub fn run(
    args: CrawlArgs,
    config: &Config,
    shutdown: &ShutdownCoordinator,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let mode = args.mode();
    let crawl = args.apply(config.crawl_config());
    log::info!(
        "Starting {mode:?} run: {} browsers, {} downloads, page timeout {}s",
        crawl.collect_workers,
        crawl.download_workers,
        crawl.browser.page_timeout.as_secs()
    );

    let ledger = Arc::new(
        WorkLedger::open(&crawl.ledger_path)
            .with_context(|| format!("cannot open ledger {}", crawl.ledger_path.display()))?,
    );

    // Whichever path ends the run records why; a signal leaves it unset
    let reason: Arc<OnceLock<&'static str>> = Arc::new(OnceLock::new());
    {
        let ledger = ledger.clone();
        let reason = reason.clone();
        let progress = progress.clone();
        let summary_path = config.paths.logs.join(SUMMARY_LOG);
        shutdown.on_finalize(move || {
            ledger.close();
            progress.clear();
            let counts = ledger.counts();
            let reason = reason.get().copied().unwrap_or("interrupted");
            if let Err(e) = ExitSummary::new(reason, counts).append_to(&summary_path) {
                log::warn!("Cannot write {}: {e}", summary_path.display());
            }
            counts.log();
            eprintln!("\n{}", counts.format_table());
        });
    }

    let provider = Arc::new(CookieSessionProvider::new(
        &crawl.cookies_path,
        crawl.site.clone(),
        crawl.browser.page_timeout,
    ));
    let collaborators = Collaborators {
        sessions: Arc::new(ChromeLauncher::new(crawl.browser.clone(), Some(shutdown.clone()))),
        provider: provider.clone(),
        extractor: Arc::new(StaticLinkExtractor::new(
            crawl.site.static_host.clone(),
            crawl.browser.page_timeout,
        )),
    };
    let crawler = Crawler::new(
        crawl.clone(),
        ledger,
        collaborators,
        Arc::new(HttpFetcher),
        Arc::new(BatchFolderSeeds::new(&crawl.seeds_dir)),
        shutdown.clone(),
        progress.clone(),
    );

    if mode.collects() {
        if let Err(e) = ensure_session(&crawler, &crawl, &provider, config, shutdown) {
            if shutdown.is_shutdown_requested() {
                shutdown.finalize();
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
            let _ = reason.set("failed");
            shutdown.finalize();
            return Err(e);
        }
    }

    let prompt: Box<dyn Prompt> = if args.yes {
        Box::new(FixedAnswer(true))
    } else {
        Box::new(ConsolePrompt)
    };
    let report = crawler.run(mode, prompt.as_ref());

    let _ = reason.set(report.exit_reason());
    log::info!(
        "Run finished ({}): {} URLs processed, {} links discovered",
        report.exit_reason(),
        report.urls_processed(),
        report.discovered
    );
    shutdown.finalize();

    if report.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Verify the saved session, logging in once if it is missing or expired.
fn ensure_session(
    crawler: &Crawler,
    crawl: &CrawlConfig,
    provider: &CookieSessionProvider,
    config: &Config,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    match crawler.verify_session() {
        Ok(()) => {
            log::info!("Saved session is valid");
            Ok(())
        }
        Err(CrawlError::Authentication(msg)) => {
            log::warn!("{msg}, logging in");
            let credentials = login::credentials(&config.paths.credentials)?;
            login::sign_in(&crawl.browser, &crawl.site, provider, &credentials, shutdown)?;
            crawler
                .verify_session()
                .context("login did not produce a usable session")
        }
        Err(e) => Err(e).context("cannot start a browser session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: CrawlArgs,
    }

    fn parse(argv: &[&str]) -> Result<CrawlArgs, clap::Error> {
        Wrapper::try_parse_from(std::iter::once("crawl").chain(argv.iter().copied()))
            .map(|w| w.args)
    }

    #[test]
    fn modes_from_flags() {
        assert_eq!(parse(&[]).unwrap().mode(), RunMode::Full);
        assert_eq!(parse(&["--collect-only"]).unwrap().mode(), RunMode::CollectOnly);
        assert_eq!(parse(&["--download-only"]).unwrap().mode(), RunMode::DownloadOnly);
    }

    #[test]
    fn collect_and_download_only_conflict() {
        assert!(parse(&["--collect-only", "--download-only"]).is_err());
    }

    #[test]
    fn overrides_are_clamped() {
        let args = parse(&["--no-headless", "--page-timeout", "500", "--workers", "3"]).unwrap();
        let crawl = args.apply(CrawlConfig::default());
        assert!(!crawl.browser.headless);
        assert_eq!(crawl.browser.page_timeout, Duration::from_secs(120));
        assert_eq!(crawl.collect_workers, 3);
    }
}

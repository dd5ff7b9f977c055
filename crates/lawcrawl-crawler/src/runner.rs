//! Pipeline driver: collection passes with operator-approved retries, then
//! downloads.

use std::sync::Arc;

use lawcrawl_core::{CrawlError, SharedProgress, ShutdownCoordinator, fmt_num};
use lawcrawl_ledger::{LedgerCounts, WorkLedger};
use rustc_hash::FxHashSet;

use crate::collect::{Collaborators, CollectionScheduler};
use crate::config::CrawlConfig;
use crate::discovery::DiscoveryLog;
use crate::download::{DownloadScheduler, Fetcher};
use crate::seeds::SeedSource;
use crate::stats::{CollectionReport, DownloadReport};

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Full,
    CollectOnly,
    DownloadOnly,
}

impl RunMode {
    pub fn collects(self) -> bool {
        self != Self::DownloadOnly
    }

    pub fn downloads(self) -> bool {
        self != Self::CollectOnly
    }

    /// Only full runs ask the operator anything
    pub fn is_interactive(self) -> bool {
        self == Self::Full
    }
}

/// Result of one collection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// FAILED URLs remain and the operator chose not to retry
    Declined,
    /// Operator asked to collect these FAILED URLs again
    RetryRequested(Vec<String>),
    Interrupted,
}

/// Yes/no question to the operator.
pub trait Prompt {
    fn confirm(&self, question: &str) -> bool;
}

/// Asks on the terminal; anything but `y`/`yes` is a no.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolePrompt;

impl Prompt for ConsolePrompt {
    fn confirm(&self, question: &str) -> bool {
        let term = console::Term::stderr();
        if term.write_str(&format!("{question} [y/N] ")).is_err() {
            return false;
        }
        match term.read_line() {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                log::warn!("Cannot read answer: {e}");
                false
            }
        }
    }
}

/// Gives the same answer to every question.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Prompt for FixedAnswer {
    fn confirm(&self, question: &str) -> bool {
        log::info!("{question} {}", if self.0 { "yes" } else { "no" });
        self.0
    }
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final collection outcome; `Completed` when collection did not run
    pub outcome: PassOutcome,
    pub passes: Vec<CollectionReport>,
    pub downloads: Option<DownloadReport>,
    /// Ledger totals after the run
    pub counts: LedgerCounts,
    pub discovered: usize,
    pub interrupted: bool,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            outcome: PassOutcome::Completed,
            passes: Vec::new(),
            downloads: None,
            counts: LedgerCounts::default(),
            discovered: 0,
            interrupted: false,
        }
    }
}

impl RunReport {
    /// Reason recorded in the exit summary
    pub fn exit_reason(&self) -> &'static str {
        if self.interrupted {
            "interrupted"
        } else if self.outcome == PassOutcome::Declined {
            "declined"
        } else {
            "completed"
        }
    }

    /// URLs handed to collection across all passes
    pub fn urls_processed(&self) -> usize {
        self.passes.iter().map(|p| p.submitted).sum()
    }
}

/// Owns the collaborators and drives both phases.
pub struct Crawler {
    config: CrawlConfig,
    ledger: Arc<WorkLedger>,
    collaborators: Collaborators,
    fetcher: Arc<dyn Fetcher>,
    seeds: Arc<dyn SeedSource>,
    shutdown: ShutdownCoordinator,
    progress: SharedProgress,
    discovery: DiscoveryLog,
}

impl Crawler {
    pub fn new(
        config: CrawlConfig,
        ledger: Arc<WorkLedger>,
        collaborators: Collaborators,
        fetcher: Arc<dyn Fetcher>,
        seeds: Arc<dyn SeedSource>,
        shutdown: ShutdownCoordinator,
        progress: SharedProgress,
    ) -> Self {
        Self {
            config,
            ledger,
            collaborators,
            fetcher,
            seeds,
            shutdown,
            progress,
            discovery: DiscoveryLog::new(),
        }
    }

    pub fn ledger(&self) -> &WorkLedger {
        &self.ledger
    }

    pub fn discovery(&self) -> &DiscoveryLog {
        &self.discovery
    }

    /// Check that a fresh browser can reach the site logged in, and refresh
    /// the saved session on success.
    pub fn verify_session(&self) -> Result<(), CrawlError> {
        let mut session = self.collaborators.sessions.launch()?;
        let provider = &self.collaborators.provider;
        provider.restore(session.as_mut());
        let authenticated = provider.ensure_authenticated(session.as_mut());
        if authenticated {
            if let Err(e) = provider.persist(session.as_mut()) {
                log::warn!("Could not refresh saved session: {e}");
            }
        }
        session.shutdown();
        if authenticated {
            Ok(())
        } else {
            Err(CrawlError::Authentication(
                "saved session is missing or expired".into(),
            ))
        }
    }

    /// Run the phases selected by `mode`.
    pub fn run(&self, mode: RunMode, prompt: &dyn Prompt) -> RunReport {
        let mut report = RunReport::default();

        if mode.collects() {
            let decline = FixedAnswer(false);
            let prompt: &dyn Prompt = if mode.is_interactive() { prompt } else { &decline };
            let (passes, outcome) = self.process_all_urls(prompt);
            report.interrupted = outcome == PassOutcome::Interrupted;
            report.passes = passes;
            report.outcome = outcome;
        }

        if mode.downloads() && !self.shutdown.is_shutdown_requested() {
            let downloads = self.download_pending();
            downloads.log();
            if self.progress.is_tty() {
                self.progress.println(downloads.format_table());
            }
            report.downloads = Some(downloads);
        }

        report.interrupted |= self.shutdown.is_shutdown_requested();
        report.discovered = self.discovery.len();
        report.counts = self.ledger.counts();
        report
    }

    /// Collection passes until nothing failed, the operator declines a
    /// retry, shutdown interrupts or the retry bound is hit.
    ///
    /// Returns the per-pass reports and the last pass outcome, which is
    /// never `RetryRequested`.
    pub fn process_all_urls(&self, prompt: &dyn Prompt) -> (Vec<CollectionReport>, PassOutcome) {
        let mut passes = Vec::new();
        let mut retry: Option<Vec<String>> = None;

        for round in 0..=self.config.max_retry_rounds {
            if round > 0 {
                log::info!("Retry round {round}/{}", self.config.max_retry_rounds);
            }
            let (report, outcome) = self.collection_pass(retry.take(), prompt);
            passes.push(report);
            match outcome {
                PassOutcome::RetryRequested(urls) => retry = Some(urls),
                done => return (passes, done),
            }
        }
        log::warn!(
            "Stopped after {} retry rounds, failed URLs remain in the ledger",
            self.config.max_retry_rounds
        );
        (passes, PassOutcome::Declined)
    }

    /// One pass over the unprocessed seeds, or over `retry` when given.
    pub fn collection_pass(
        &self,
        retry: Option<Vec<String>>,
        prompt: &dyn Prompt,
    ) -> (CollectionReport, PassOutcome) {
        let (urls, skipped) = match retry {
            Some(urls) => (urls, 0),
            None => self.unprocessed_seeds(),
        };

        let scheduler = CollectionScheduler::new(
            &self.config,
            &self.ledger,
            &self.collaborators,
            &self.discovery,
            &self.shutdown,
            &self.progress,
        );
        let mut report = scheduler.run_pass(&urls);
        report.skipped = skipped;
        report.log();
        if self.progress.is_tty() && report.submitted > 0 {
            self.progress.println(report.format_table());
        }

        if self.shutdown.is_shutdown_requested() {
            return (report, PassOutcome::Interrupted);
        }
        if report.submitted == 0 {
            return (report, PassOutcome::Completed);
        }

        let failed = self.ledger.failed_collection_urls();
        if failed.is_empty() {
            return (report, PassOutcome::Completed);
        }
        log::warn!("{} URLs failed collection", fmt_num(failed.len()));
        let question = format!("Retry {} failed URLs?", fmt_num(failed.len()));
        if prompt.confirm(&question) {
            (report, PassOutcome::RetryRequested(failed))
        } else {
            (report, PassOutcome::Declined)
        }
    }

    /// Seeds registered as PENDING, minus those already processed.
    fn unprocessed_seeds(&self) -> (Vec<String>, usize) {
        let candidates = match self.seeds.list_candidate_urls() {
            Ok(urls) => unique_urls(urls),
            Err(e) => {
                log::error!("Cannot read seed URLs: {e:#}");
                return (Vec::new(), 0);
            }
        };
        let added = self.ledger.register_pending(&candidates);
        if added > 0 {
            log::info!("Registered {} new URLs", fmt_num(added));
        }
        let todo = self.ledger.unprocessed(&candidates, self.config.skip_policy);
        let skipped = candidates.len().saturating_sub(todo.len());
        log::info!(
            "{} URLs to process, {} already processed",
            fmt_num(todo.len()),
            fmt_num(skipped)
        );
        (todo, skipped)
    }

    /// Fetch every pending download recorded in the ledger.
    pub fn download_pending(&self) -> DownloadReport {
        let tasks = self.ledger.pending_downloads();
        DownloadScheduler::new(
            &self.config,
            &self.ledger,
            self.fetcher.as_ref(),
            &self.shutdown,
            &self.progress,
        )
        .process_downloads(tasks)
    }
}

/// Trimmed, non-empty URLs with duplicates removed, first occurrence wins
fn unique_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect()
}

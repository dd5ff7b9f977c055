//! Collection phase: contiguous URL batches, one browser per batch.
//!
//! Each batch runs on its own pool thread with an isolated browser session
//! and reports back over a channel. Only the calling thread touches the
//! ledger, in batch completion order. A batch that outlives the batch
//! timeout is cancelled, marked FAILED in bulk and its late results are
//! dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use lawcrawl_core::shutdown::WorkerGuard;
use lawcrawl_core::{
    CancellationToken, CrawlError, ProgressContext, RetryPolicy, ShutdownCoordinator, fmt_num,
    partition_batches,
};
use lawcrawl_ledger::{CollectionStatus, FileType, WorkItem, WorkLedger};

use crate::config::CrawlConfig;
use crate::discovery::DiscoveryLog;
use crate::extractor::{ExtractedLinks, PageExtractor};
use crate::session::{BrowserSession, SessionFactory, SessionProvider};
use crate::stats::CollectionReport;

/// Non-TTY progress is logged every this many URLs
const LOG_EVERY: usize = 100;

/// Longest single wait for batch events
const EVENT_POLL: Duration = Duration::from_secs(1);

/// External collaborators used by collection workers.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionFactory>,
    pub provider: Arc<dyn SessionProvider>,
    pub extractor: Arc<dyn PageExtractor>,
}

/// Final result for one page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlOutcome {
    pub page_url: String,
    /// Empty when extraction failed or found nothing
    pub links: ExtractedLinks,
}

impl UrlOutcome {
    fn to_row(&self) -> WorkItem {
        let status = if self.links.is_empty() {
            CollectionStatus::Failed
        } else {
            CollectionStatus::Found
        };
        WorkItem {
            doc_url: self.links.doc_url.clone(),
            pdf_url: self.links.pdf_url.clone(),
            collection_status: status,
            ..WorkItem::pending(self.page_url.as_str())
        }
    }
}

enum BatchOutcome {
    /// `cancelled` trailing URLs were never finished and stay PENDING
    Completed {
        outcomes: Vec<UrlOutcome>,
        cancelled: usize,
    },
    /// Whole batch unusable (launch, auth, panic)
    Failed(String),
}

impl BatchOutcome {
    fn cancelled(n: usize) -> Self {
        Self::Completed {
            outcomes: Vec::new(),
            cancelled: n,
        }
    }
}

enum BatchEvent {
    Started(usize),
    UrlDone { batch: usize, found: bool },
    Finished(usize, BatchOutcome),
}

/// Main-thread view of one submitted batch
struct BatchSlot {
    urls: Vec<String>,
    token: CancellationToken,
    started: Option<Instant>,
    processed: usize,
    open: bool,
}

/// Runs collection passes over a set of page URLs.
pub struct CollectionScheduler<'a> {
    config: &'a CrawlConfig,
    ledger: &'a WorkLedger,
    collaborators: &'a Collaborators,
    discovery: &'a DiscoveryLog,
    shutdown: &'a ShutdownCoordinator,
    progress: &'a ProgressContext,
}

impl<'a> CollectionScheduler<'a> {
    pub fn new(
        config: &'a CrawlConfig,
        ledger: &'a WorkLedger,
        collaborators: &'a Collaborators,
        discovery: &'a DiscoveryLog,
        shutdown: &'a ShutdownCoordinator,
        progress: &'a ProgressContext,
    ) -> Self {
        Self {
            config,
            ledger,
            collaborators,
            discovery,
            shutdown,
            progress,
        }
    }

    /// Collect every URL in `urls` and commit the results.
    ///
    /// Returns once every batch finished, timed out or was abandoned by
    /// shutdown. Never fails: pool-level problems become FAILED rows.
    pub fn run_pass(&self, urls: &[String]) -> CollectionReport {
        let start = Instant::now();
        let mut report = CollectionReport {
            submitted: urls.len(),
            ..Default::default()
        };
        if urls.is_empty() {
            log::info!("No URLs to collect");
            return report;
        }
        // Held until every received batch is committed, so a graceful drain
        // cannot finalize the ledger between a worker's exit and its commit
        let _committing = self.shutdown.enter_worker();

        let batches = partition_batches(urls, self.config.collect_workers);
        report.batches = batches.len();
        log::info!(
            "Collecting {} URLs in {} batches of up to {}",
            fmt_num(urls.len()),
            batches.len(),
            batches.first().map_or(0, Vec::len)
        );

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(batches.len())
            .thread_name(|i| format!("collect-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                log::error!("Failed to create collection pool: {e}");
                for batch in &batches {
                    self.fail_batch(batch, &format!("pool unavailable: {e}"), &mut report);
                }
                report.elapsed = start.elapsed();
                return report;
            }
        };

        let pb = self.progress.phase_bar("collect", urls.len() as u64);
        let root = self.shutdown.token();
        let (tx, rx) = mpsc::channel();
        let mut slots = Vec::with_capacity(batches.len());

        for (index, batch) in batches.into_iter().enumerate() {
            let token = root.child();
            let mut slot = BatchSlot {
                urls: batch,
                token: token.clone(),
                started: None,
                processed: 0,
                open: false,
            };
            if root.is_cancelled() {
                log::info!("Shutdown requested, {} URLs not submitted", slot.urls.len());
                report.cancelled += slot.urls.len();
                slots.push(slot);
                continue;
            }
            let worker = BatchWorker {
                index,
                urls: slot.urls.clone(),
                token,
                collaborators: self.collaborators.clone(),
                retry: self.config.retry,
                line: self.progress.stage_line(&format!("batch {}", index + 1)),
                tx: tx.clone(),
                _guard: self.shutdown.enter_worker(),
            };
            pool.spawn(move || worker.run());
            slot.open = true;
            slots.push(slot);
        }
        drop(tx);

        let mut open = slots.iter().filter(|s| s.open).count();
        let (mut processed, mut found, mut failed) = (0usize, 0usize, 0usize);

        while open > 0 {
            match rx.recv_timeout(self.next_wait(&slots)) {
                Ok(BatchEvent::Started(i)) => {
                    slots[i].started = Some(Instant::now());
                }
                Ok(BatchEvent::UrlDone { batch, found: hit }) if slots[batch].open => {
                    slots[batch].processed += 1;
                    processed += 1;
                    if hit {
                        found += 1;
                    } else {
                        failed += 1;
                    }
                    pb.inc(1);
                    pb.set_message(format!("{found} found, {failed} failed"));
                    if !self.progress.is_tty() && processed % LOG_EVERY == 0 {
                        log::info!(
                            "Collected {}/{} URLs ({} found, {} failed)",
                            fmt_num(processed),
                            fmt_num(urls.len()),
                            fmt_num(found),
                            fmt_num(failed)
                        );
                    }
                }
                Ok(BatchEvent::UrlDone { .. }) => {}
                Ok(BatchEvent::Finished(i, outcome)) if slots[i].open => {
                    let slot = &mut slots[i];
                    slot.open = false;
                    open -= 1;
                    if let BatchOutcome::Failed(_) = outcome {
                        pb.inc((slot.urls.len() - slot.processed) as u64);
                    }
                    self.commit(i, &slot.urls, outcome, &mut report);
                }
                Ok(BatchEvent::Finished(i, _)) => {
                    log::debug!("Dropping late results of batch {}", i + 1);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every worker is gone; anything still open never reported
                    for (i, slot) in slots.iter_mut().enumerate().filter(|(_, s)| s.open) {
                        slot.open = false;
                        log::error!("Batch {} ended without a result", i + 1);
                        self.fail_batch(&slot.urls, "worker vanished", &mut report);
                    }
                    open = 0;
                }
            }

            // No batch deadlines once shutdown was requested
            if !self.shutdown.is_shutdown_requested() {
                let timeout = self.config.batch_timeout;
                for (i, slot) in slots.iter_mut().enumerate() {
                    let expired = slot.open && slot.started.is_some_and(|t| t.elapsed() >= timeout);
                    if expired {
                        slot.token.cancel();
                        slot.open = false;
                        open -= 1;
                        pb.inc((slot.urls.len() - slot.processed) as u64);
                        log::error!("Batch {} timed out after {}s", i + 1, timeout.as_secs());
                        self.fail_batch(
                            &slot.urls,
                            &format!("timed out after {}s", timeout.as_secs()),
                            &mut report,
                        );
                    }
                }
            }
        }

        pb.finish_and_clear();
        report.elapsed = start.elapsed();
        report
    }

    /// Time until the nearest batch deadline, capped at [`EVENT_POLL`]
    fn next_wait(&self, slots: &[BatchSlot]) -> Duration {
        let now = Instant::now();
        slots
            .iter()
            .filter(|s| s.open)
            .filter_map(|s| s.started)
            .map(|t| (t + self.config.batch_timeout).saturating_duration_since(now))
            .min()
            .unwrap_or(EVENT_POLL)
            .clamp(Duration::from_millis(1), EVENT_POLL)
    }

    fn commit(
        &self,
        index: usize,
        urls: &[String],
        outcome: BatchOutcome,
        report: &mut CollectionReport,
    ) {
        match outcome {
            BatchOutcome::Completed {
                outcomes,
                cancelled,
            } => {
                let mut discovered = Vec::new();
                for outcome in &outcomes {
                    if outcome.links.is_empty() {
                        report.failed += 1;
                    } else {
                        report.found += 1;
                        discovered.extend(outcome.links.tasks(&outcome.page_url));
                    }
                }
                report.docs_discovered += discovered
                    .iter()
                    .filter(|t| t.file_type == FileType::Doc)
                    .count();
                report.pdfs_discovered += discovered
                    .iter()
                    .filter(|t| t.file_type == FileType::Pdf)
                    .count();
                report.cancelled += cancelled;

                self.ledger.upsert_many(outcomes.iter().map(UrlOutcome::to_row));
                self.discovery.append(discovered);
                log::debug!(
                    "Batch {} committed: {} URLs, {} left pending",
                    index + 1,
                    outcomes.len(),
                    cancelled
                );
            }
            BatchOutcome::Failed(reason) => {
                if self.shutdown.is_shutdown_requested() {
                    log::info!("Batch {} aborted by shutdown, URLs stay pending", index + 1);
                    report.cancelled += urls.len();
                    return;
                }
                log::error!("Batch {} failed: {reason}", index + 1);
                self.fail_batch(urls, &reason, report);
            }
        }
    }

    /// Mark every URL of a batch FAILED.
    fn fail_batch(&self, urls: &[String], reason: &str, report: &mut CollectionReport) {
        log::warn!("Marking {} URLs FAILED ({reason})", urls.len());
        report.failed_batches += 1;
        report.failed += urls.len();
        self.ledger.upsert_many(urls.iter().map(|url| WorkItem {
            collection_status: CollectionStatus::Failed,
            ..WorkItem::pending(url.as_str())
        }));
    }
}

/// Everything one batch task owns.
struct BatchWorker {
    index: usize,
    urls: Vec<String>,
    token: CancellationToken,
    collaborators: Collaborators,
    retry: RetryPolicy,
    line: ProgressBar,
    tx: Sender<BatchEvent>,
    /// Released after the final event is sent; the commit is covered by
    /// the scheduler's own guard
    _guard: WorkerGuard,
}

impl BatchWorker {
    fn run(self) {
        let _ = self.tx.send(BatchEvent::Started(self.index));
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.collect())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                log::error!("Batch {} worker panicked: {msg}", self.index + 1);
                BatchOutcome::Failed(format!("worker panicked: {msg}"))
            }
        };
        self.line.finish_and_clear();
        let _ = self.tx.send(BatchEvent::Finished(self.index, outcome));
    }

    fn collect(&self) -> BatchOutcome {
        if self.token.is_cancelled() {
            return BatchOutcome::cancelled(self.urls.len());
        }
        self.line.set_message("launching browser...");
        let mut session = match self.collaborators.sessions.launch() {
            Ok(session) => session,
            Err(e) if e.is_cancelled() || self.token.is_cancelled() => {
                return BatchOutcome::cancelled(self.urls.len());
            }
            Err(e) => return BatchOutcome::Failed(format!("browser launch failed: {e}")),
        };
        let outcome = self.collect_with(session.as_mut());
        session.shutdown();
        outcome
    }

    fn collect_with(&self, session: &mut dyn BrowserSession) -> BatchOutcome {
        let label = format!("batch {}", self.index + 1);
        let provider = &self.collaborators.provider;
        let extractor = &self.collaborators.extractor;

        self.line.set_message("restoring session...");
        if !provider.restore(session) {
            log::warn!("{label}: no saved session to restore");
        }
        if !provider.ensure_authenticated(session) {
            if self.token.is_cancelled() {
                return BatchOutcome::cancelled(self.urls.len());
            }
            return BatchOutcome::Failed("session is not authenticated".into());
        }

        let total = self.urls.len();
        let mut outcomes = Vec::with_capacity(total);
        for (n, url) in self.urls.iter().enumerate() {
            self.line.set_message(format!("{}/{total} {url}", n + 1));
            let links = match self
                .retry
                .run(url, &self.token, &self.line, |_| extractor.extract(&mut *session, url))
            {
                Ok(links) => {
                    if links.is_empty() {
                        log::warn!("{url}: no download links found");
                    }
                    links
                }
                Err(CrawlError::Cancelled) => {
                    log::info!("{label}: cancelled with {} URLs left", total - n);
                    return BatchOutcome::Completed {
                        outcomes,
                        cancelled: total - n,
                    };
                }
                Err(e) => {
                    log::debug!("{url}: giving up: {e}");
                    ExtractedLinks::default()
                }
            };
            let found = !links.is_empty();
            outcomes.push(UrlOutcome {
                page_url: url.clone(),
                links,
            });
            let _ = self.tx.send(BatchEvent::UrlDone {
                batch: self.index,
                found,
            });
        }
        log::debug!("{label}: done, {} URLs", outcomes.len());
        BatchOutcome::Completed {
            outcomes,
            cancelled: 0,
        }
    }
}

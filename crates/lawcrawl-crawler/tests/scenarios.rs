//! End-to-end runs of the collection and download phases against in-memory
//! browser, extractor and fetcher fakes.
//!
//! Run with: cargo test -p lawcrawl-crawler --test scenarios

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::ProgressBar;
use lawcrawl_core::{
    CancellationToken, CrawlError, DrainOutcome, ProgressContext, RetryPolicy, SharedProgress,
    ShutdownCoordinator,
};
use lawcrawl_crawler::{
    BrowserSession, Collaborators, CollectionScheduler, Cookie, CrawlConfig, Crawler, DiscoveryLog,
    ExtractedLinks, Fetcher, FixedAnswer, PageExtractor, PassOutcome, RunMode, SeedSource,
    SessionFactory, SessionProvider, StaticSeeds, document_stem,
};
use lawcrawl_ledger::{CollectionStatus, DownloadStatus, WorkLedger};
use tempfile::TempDir;

const PAGE_1: &str = "https://luatvietnam.vn/van-ban/luat-dat-dai-1-d1.html";
const PAGE_2: &str = "https://luatvietnam.vn/van-ban/nghi-dinh-2-d1.html";
const PAGE_3: &str = "https://luatvietnam.vn/van-ban/thong-tu-3-d1.html";
const DOC_1: &str = "https://static.luatvietnam.vn/files/luat-dat-dai.docx";
const PDF_1: &str = "https://static.luatvietnam.vn/files/luat-dat-dai.pdf";

// ============================================================
// Fakes
// ============================================================

struct FakeSession;

impl BrowserSession for FakeSession {
    fn render(&mut self, _url: &str, _timeout: Duration) -> Result<String, CrawlError> {
        Ok(String::new())
    }

    fn cookies(&mut self) -> Result<Vec<Cookie>, CrawlError> {
        Ok(Vec::new())
    }

    fn set_cookies(&mut self, _cookies: &[Cookie]) -> Result<(), CrawlError> {
        Ok(())
    }

    fn shutdown(&mut self) {}
}

struct FakeFactory;

impl SessionFactory for FakeFactory {
    fn launch(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        Ok(Box::new(FakeSession))
    }
}

struct FakeProvider {
    authenticated: bool,
}

impl SessionProvider for FakeProvider {
    fn restore(&self, _session: &mut dyn BrowserSession) -> bool {
        true
    }

    fn ensure_authenticated(&self, _session: &mut dyn BrowserSession) -> bool {
        self.authenticated
    }

    fn persist(&self, _session: &mut dyn BrowserSession) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// Scripted behavior of one page
#[derive(Clone)]
enum Page {
    Links(ExtractedLinks),
    /// Renders but carries no download link
    Empty,
    /// Every attempt hits a network error
    Transient,
    /// Nothing found on the first `n` calls, links afterwards
    EmptyThenLinks(usize, ExtractedLinks),
    Slow(Duration),
    /// Requests shutdown while the page is loading
    Interrupt(ShutdownCoordinator),
    /// Requests shutdown after `delay`, then still finishes the page
    InterruptThenLinks(Duration, ShutdownCoordinator),
}

#[derive(Default)]
struct FakeExtractor {
    pages: HashMap<String, Page>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeExtractor {
    fn new(pages: impl IntoIterator<Item = (&'static str, Page)>) -> Self {
        Self {
            pages: pages.into_iter().map(|(u, p)| (u.to_string(), p)).collect(),
            calls: Mutex::default(),
        }
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl PageExtractor for FakeExtractor {
    fn extract(
        &self,
        _session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<ExtractedLinks, CrawlError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(url.to_string()).or_default();
            *n += 1;
            *n
        };
        match self.pages.get(url).cloned().unwrap_or(Page::Empty) {
            Page::Links(links) => Ok(links),
            Page::Empty => Ok(ExtractedLinks::default()),
            Page::Transient => Err(CrawlError::TransientNetwork("connection reset".into())),
            Page::EmptyThenLinks(n, links) if call > n => Ok(links),
            Page::EmptyThenLinks(..) => Ok(ExtractedLinks::default()),
            Page::Slow(delay) => {
                std::thread::sleep(delay);
                Ok(doc_only(DOC_1))
            }
            Page::Interrupt(shutdown) => {
                shutdown.request();
                Err(CrawlError::Cancelled)
            }
            Page::InterruptThenLinks(delay, shutdown) => {
                std::thread::sleep(delay);
                shutdown.request();
                Ok(doc_only(DOC_1))
            }
        }
    }
}

/// Writes the URL as the file body
#[derive(Default)]
struct FakeFetcher {
    calls: AtomicUsize,
}

impl Fetcher for FakeFetcher {
    fn fetch(
        &self,
        url: &str,
        target: &Path,
        _token: &CancellationToken,
        _pb: &ProgressBar,
    ) -> Result<u64, CrawlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(target, url).map_err(|e| CrawlError::resource(target, e))?;
        Ok(url.len() as u64)
    }
}

/// Seed list returned as is, duplicates included
struct RawSeeds(Vec<&'static str>);

impl SeedSource for RawSeeds {
    fn list_candidate_urls(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

fn doc_only(url: &str) -> ExtractedLinks {
    ExtractedLinks {
        doc_url: Some(url.into()),
        pdf_url: None,
    }
}

// ============================================================
// Harness
// ============================================================

struct Harness {
    dir: TempDir,
    config: CrawlConfig,
    ledger: Arc<WorkLedger>,
    extractor: Arc<FakeExtractor>,
    fetcher: Arc<FakeFetcher>,
    shutdown: ShutdownCoordinator,
    progress: SharedProgress,
    authenticated: bool,
}

impl Harness {
    fn new(pages: impl IntoIterator<Item = (&'static str, Page)>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = CrawlConfig {
            ledger_path: dir.path().join("download_urls.csv"),
            downloads_dir: dir.path().join("downloads"),
            collect_workers: 2,
            download_workers: 2,
            batch_timeout: Duration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: 3,
                base: Duration::from_millis(1),
            },
            max_retry_rounds: 2,
            ..Default::default()
        };
        let ledger = Arc::new(WorkLedger::open(&config.ledger_path).expect("ledger opens"));
        Self {
            dir,
            config,
            ledger,
            extractor: Arc::new(FakeExtractor::new(pages)),
            fetcher: Arc::new(FakeFetcher::default()),
            shutdown: ShutdownCoordinator::new(Duration::from_secs(1)),
            progress: Arc::new(ProgressContext::hidden()),
            authenticated: true,
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            sessions: Arc::new(FakeFactory),
            provider: Arc::new(FakeProvider {
                authenticated: self.authenticated,
            }),
            extractor: self.extractor.clone(),
        }
    }

    fn crawler(&self, seeds: &[&str]) -> Crawler {
        Crawler::new(
            self.config.clone(),
            self.ledger.clone(),
            self.collaborators(),
            self.fetcher.clone(),
            Arc::new(StaticSeeds(seeds.iter().map(|s| s.to_string()).collect())),
            self.shutdown.clone(),
            self.progress.clone(),
        )
    }

    /// One collection pass straight through the scheduler.
    fn collect(&self, urls: &[&str]) -> lawcrawl_crawler::CollectionReport {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        self.ledger.register_pending(&urls);
        let collaborators = self.collaborators();
        let discovery = DiscoveryLog::new();
        CollectionScheduler::new(
            &self.config,
            &self.ledger,
            &collaborators,
            &discovery,
            &self.shutdown,
            &self.progress,
        )
        .run_pass(&urls)
    }

    fn status(&self, url: &str) -> (CollectionStatus, DownloadStatus) {
        let row = self.ledger.get(url).expect("row exists");
        (row.collection_status, row.download_status)
    }
}

// ============================================================
// Collection
// ============================================================

#[test]
fn found_and_empty_pages_are_recorded() {
    let h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1))), (PAGE_2, Page::Empty)]);
    let report = h.collect(&[PAGE_1, PAGE_2]);

    assert_eq!(report.submitted, 2);
    assert_eq!(report.found, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.docs_discovered, 1);

    let row = h.ledger.get(PAGE_1).unwrap();
    assert_eq!(row.collection_status, CollectionStatus::Found);
    assert_eq!(row.download_status, DownloadStatus::NotStarted);
    assert_eq!(row.doc_url.as_deref(), Some(DOC_1));
    assert_eq!(row.pdf_url, None);
    assert_eq!(h.status(PAGE_2), (CollectionStatus::Failed, DownloadStatus::NotStarted));
}

#[test]
fn transient_errors_stop_at_attempt_budget() {
    let h = Harness::new([(PAGE_3, Page::Transient)]);
    h.ledger.register_pending(&[PAGE_3]);
    let before = h.ledger.mutations();

    let report = h.collect(&[PAGE_3]);

    assert_eq!(h.extractor.calls(PAGE_3), 3);
    assert_eq!(report.failed, 1);
    assert_eq!(h.ledger.mutations() - before, 1);
    assert_eq!(h.status(PAGE_3).0, CollectionStatus::Failed);
}

#[test]
fn unauthenticated_batch_fails_in_bulk() {
    let mut h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1)))]);
    h.authenticated = false;
    h.config.collect_workers = 1;

    let report = h.collect(&[PAGE_1, PAGE_2]);

    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(h.extractor.total_calls(), 0);
    assert_eq!(h.status(PAGE_1).0, CollectionStatus::Failed);
    assert_eq!(h.status(PAGE_2).0, CollectionStatus::Failed);
}

#[test]
fn slow_batch_times_out_as_failed() {
    let mut h = Harness::new([(PAGE_1, Page::Slow(Duration::from_secs(2)))]);
    h.config.collect_workers = 1;
    h.config.batch_timeout = Duration::from_millis(200);

    let report = h.collect(&[PAGE_1, PAGE_2]);

    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.found, 0);
    assert_eq!(h.status(PAGE_1).0, CollectionStatus::Failed);
    assert_eq!(h.status(PAGE_2).0, CollectionStatus::Failed);
}

#[test]
fn shutdown_leaves_unfinished_urls_pending() {
    let mut h = Harness::new([]);
    h.config.collect_workers = 1;
    let h = Harness {
        extractor: Arc::new(FakeExtractor::new([
            (PAGE_1, Page::Links(doc_only(DOC_1))),
            (PAGE_2, Page::Interrupt(h.shutdown.clone())),
            (PAGE_3, Page::Links(doc_only(DOC_1))),
        ])),
        ..h
    };

    let report = h.collect(&[PAGE_1, PAGE_2, PAGE_3]);

    assert!(h.shutdown.is_shutdown_requested());
    assert_eq!(report.found, 1);
    assert_eq!(report.cancelled, 2);
    assert_eq!(h.status(PAGE_1).0, CollectionStatus::Found);
    assert_eq!(h.status(PAGE_2).0, CollectionStatus::Pending);
    assert_eq!(h.status(PAGE_3).0, CollectionStatus::Pending);
    assert_eq!(h.extractor.calls(PAGE_3), 0);
}

#[test]
fn graceful_drain_keeps_results_finished_in_grace_period() {
    let pages = [
        "https://luatvietnam.vn/van-ban/a-10-d1.html",
        "https://luatvietnam.vn/van-ban/b-11-d1.html",
        "https://luatvietnam.vn/van-ban/c-12-d1.html",
        "https://luatvietnam.vn/van-ban/d-13-d1.html",
    ];
    let mut h = Harness::new([]);
    h.config.collect_workers = pages.len();
    let shutdown =
        ShutdownCoordinator::with_intervals(Duration::from_secs(10), Duration::from_millis(5));
    let interrupt = Page::InterruptThenLinks(Duration::from_millis(50), shutdown.clone());
    let slow = Page::Slow(Duration::from_millis(300));
    let h = Harness {
        extractor: Arc::new(FakeExtractor::new([
            (pages[0], interrupt),
            (pages[1], slow.clone()),
            (pages[2], slow.clone()),
            (pages[3], slow),
        ])),
        shutdown,
        ..h
    };
    let ledger = h.ledger.clone();
    h.shutdown.on_finalize(move || ledger.close());

    // Stands in for the signal thread
    let drainer = {
        let shutdown = h.shutdown.clone();
        std::thread::spawn(move || {
            while !shutdown.is_shutdown_requested() {
                std::thread::sleep(Duration::from_millis(5));
            }
            shutdown.shutdown_gracefully()
        })
    };
    let report = h.collect(&pages);
    assert_eq!(drainer.join().unwrap(), DrainOutcome::Drained);

    let started: Vec<&str> = pages
        .iter()
        .copied()
        .filter(|p| h.extractor.calls(p) > 0)
        .collect();
    assert!(started.contains(&pages[0]));
    assert_eq!(report.found, started.len());
    assert_eq!(report.found + report.cancelled, pages.len());

    let on_disk = WorkLedger::open(&h.config.ledger_path).unwrap();
    for page in pages {
        let expected = if started.contains(&page) {
            CollectionStatus::Found
        } else {
            CollectionStatus::Pending
        };
        assert_eq!(h.status(page).0, expected, "{page}");
        assert_eq!(on_disk.get(page).unwrap().collection_status, expected, "{page}");
    }
}

#[test]
fn nothing_submitted_after_shutdown() {
    let h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1)))]);
    h.shutdown.request();

    let report = h.collect(&[PAGE_1]);

    assert_eq!(report.cancelled, 1);
    assert_eq!(h.extractor.total_calls(), 0);
    assert_eq!(h.status(PAGE_1).0, CollectionStatus::Pending);
}

// ============================================================
// Full runs
// ============================================================

#[test]
fn full_run_downloads_found_pages() {
    let h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1))), (PAGE_2, Page::Empty)]);
    let crawler = h.crawler(&[PAGE_1, PAGE_2]);
    let report = crawler.run(RunMode::Full, &FixedAnswer(false));

    assert_eq!(crawler.discovery().counts(), (1, 0));
    assert_eq!(crawler.ledger().len(), 2);
    assert_eq!(report.outcome, PassOutcome::Declined);
    assert_eq!(report.exit_reason(), "declined");
    let downloads = report.downloads.expect("downloads ran");
    assert_eq!(downloads.downloaded, 1);

    let target = h
        .dir
        .path()
        .join("downloads/doc")
        .join(format!("{}.docx", document_stem(PAGE_1)));
    assert_eq!(fs::read_to_string(&target).unwrap(), DOC_1);
    assert_eq!(h.status(PAGE_1), (CollectionStatus::Found, DownloadStatus::Done));
    assert_eq!(h.status(PAGE_2), (CollectionStatus::Failed, DownloadStatus::NotStarted));
    assert_eq!(report.counts.downloads_done, 1);
}

#[test]
fn rerun_skips_processed_urls() {
    let h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1))), (PAGE_2, Page::Empty)]);
    let first = h.crawler(&[PAGE_1, PAGE_2]).run(RunMode::CollectOnly, &FixedAnswer(false));
    assert_eq!(first.urls_processed(), 2);
    assert_eq!(h.extractor.total_calls(), 2);

    // Fresh process over the same ledger file
    let reopened = Harness {
        ledger: Arc::new(WorkLedger::open(&h.config.ledger_path).unwrap()),
        ..h
    };
    let second = reopened
        .crawler(&[PAGE_1, PAGE_2])
        .run(RunMode::CollectOnly, &FixedAnswer(false));

    assert_eq!(second.urls_processed(), 0);
    assert_eq!(second.passes[0].skipped, 2);
    assert_eq!(reopened.extractor.total_calls(), 2);
}

#[test]
fn duplicate_seeds_are_not_counted_as_skipped() {
    let h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1))), (PAGE_2, Page::Empty)]);
    h.collect(&[PAGE_1]);

    let crawler = Crawler::new(
        h.config.clone(),
        h.ledger.clone(),
        h.collaborators(),
        h.fetcher.clone(),
        Arc::new(RawSeeds(vec![PAGE_1, PAGE_2, PAGE_2, PAGE_1, PAGE_3, PAGE_3])),
        h.shutdown.clone(),
        h.progress.clone(),
    );
    let report = crawler.run(RunMode::CollectOnly, &FixedAnswer(false));

    assert_eq!(report.passes[0].skipped, 1);
    assert_eq!(report.passes[0].submitted, 2);
    assert_eq!(h.extractor.calls(PAGE_1), 1);
    assert_eq!(h.extractor.calls(PAGE_2), 1);
    assert_eq!(h.extractor.calls(PAGE_3), 1);
}

#[test]
fn approved_retry_recollects_failed_urls() {
    let h = Harness::new([
        (PAGE_1, Page::Links(doc_only(DOC_1))),
        (PAGE_2, Page::EmptyThenLinks(1, doc_only(PDF_1))),
    ]);
    let report = h.crawler(&[PAGE_1, PAGE_2]).run(RunMode::CollectOnly, &FixedAnswer(true));

    // Collect-only never prompts, so the failure is left for later
    assert_eq!(report.passes.len(), 1);
    assert_eq!(report.outcome, PassOutcome::Declined);

    let (passes, outcome) = h.crawler(&[PAGE_1, PAGE_2]).process_all_urls(&FixedAnswer(true));
    assert_eq!(outcome, PassOutcome::Completed);
    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].submitted, 0);

    let (report, outcome) = h
        .crawler(&[])
        .collection_pass(Some(h.ledger.failed_collection_urls()), &FixedAnswer(true));
    assert_eq!(outcome, PassOutcome::Completed);
    assert_eq!(report.found, 1);
    assert_eq!(h.extractor.calls(PAGE_1), 1);
    assert_eq!(h.status(PAGE_2).0, CollectionStatus::Found);
}

#[test]
fn retry_rounds_are_bounded() {
    let h = Harness::new([(PAGE_1, Page::Links(doc_only(DOC_1))), (PAGE_2, Page::Empty)]);
    let (passes, outcome) = h.crawler(&[PAGE_1, PAGE_2]).process_all_urls(&FixedAnswer(true));

    assert_eq!(outcome, PassOutcome::Declined);
    assert_eq!(passes.len(), h.config.max_retry_rounds + 1);
    assert_eq!(h.extractor.calls(PAGE_1), 1);
    assert_eq!(h.extractor.calls(PAGE_2), h.config.max_retry_rounds + 1);
}

#[test]
fn existing_files_are_not_fetched_again() {
    let h = Harness::new([]);
    h.ledger.upsert(PAGE_1, Some(DOC_1), None, CollectionStatus::Found);
    let target = h
        .config
        .downloads_dir
        .join("doc")
        .join(format!("{}.docx", document_stem(PAGE_1)));
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(&target, b"already here").unwrap();

    let report = h.crawler(&[]).run(RunMode::DownloadOnly, &FixedAnswer(false));

    let downloads = report.downloads.unwrap();
    assert_eq!(downloads.existing, 1);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.status(PAGE_1).1, DownloadStatus::Done);
    assert_eq!(fs::read(&target).unwrap(), b"already here");
}

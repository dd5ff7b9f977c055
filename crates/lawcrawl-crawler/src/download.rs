//! Download phase: bounded pool of HTTP transfers.
//!
//! Workers claim tasks from a shared [`TaskQueue`]; the queue is closed as
//! soon as cancellation is observed so no new transfer starts. A page's
//! download status is written once, when its last task finishes: DONE if
//! every file arrived, FAILED if any failed. Pages touched by cancellation
//! keep NOT_STARTED.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use indicatif::ProgressBar;
use lawcrawl_core::{
    CancellationToken, CrawlError, ProgressContext, ShutdownCoordinator, TaskQueue,
    cleanup_part_files, fmt_num, stream_to_file,
};
use lawcrawl_ledger::{DownloadStatus, DownloadTask, WorkLedger};
use rustc_hash::FxHashMap;

use crate::config::CrawlConfig;
use crate::naming::document_stem;
use crate::stats::DownloadReport;

/// Non-TTY progress is logged every this many files
const LOG_EVERY: usize = 50;

/// Moves one remote file to a local path.
pub trait Fetcher: Send + Sync {
    /// Fetch `url` into `target`, returning the bytes written.
    ///
    /// `target` must only exist afterwards if the transfer completed.
    fn fetch(
        &self,
        url: &str,
        target: &Path,
        token: &CancellationToken,
        pb: &ProgressBar,
    ) -> Result<u64, CrawlError>;
}

/// HTTP GET through the shared client.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        target: &Path,
        token: &CancellationToken,
        pb: &ProgressBar,
    ) -> Result<u64, CrawlError> {
        stream_to_file(url, target, token, pb).map(|o| o.bytes)
    }
}

/// What happened to one task.
#[derive(Debug)]
pub enum TaskOutcome {
    Downloaded(u64),
    /// Target already present with non-zero size
    Existing,
    Failed(CrawlError),
    Cancelled,
}

struct Job {
    task: DownloadTask,
    target: PathBuf,
}

#[derive(Default)]
struct PageTally {
    remaining: usize,
    failed: bool,
    cancelled: bool,
}

#[derive(Default)]
struct Tally {
    pages: FxHashMap<String, PageTally>,
    report: DownloadReport,
    finished: usize,
}

/// Runs a set of download tasks and commits per-page outcomes.
pub struct DownloadScheduler<'a> {
    config: &'a CrawlConfig,
    ledger: &'a WorkLedger,
    fetcher: &'a dyn Fetcher,
    shutdown: &'a ShutdownCoordinator,
    progress: &'a ProgressContext,
}

impl<'a> DownloadScheduler<'a> {
    pub fn new(
        config: &'a CrawlConfig,
        ledger: &'a WorkLedger,
        fetcher: &'a dyn Fetcher,
        shutdown: &'a ShutdownCoordinator,
        progress: &'a ProgressContext,
    ) -> Self {
        Self {
            config,
            ledger,
            fetcher,
            shutdown,
            progress,
        }
    }

    /// `<downloads>/<type>/<stem>.<ext>` for `task`
    pub fn target_path(&self, task: &DownloadTask) -> PathBuf {
        task.target_path(&self.config.downloads_dir, &document_stem(&task.page_url))
    }

    /// Download every task; no-op for an empty list.
    pub fn process_downloads(&self, tasks: Vec<DownloadTask>) -> DownloadReport {
        if tasks.is_empty() {
            log::info!("No pending downloads");
            return DownloadReport::default();
        }
        let start = Instant::now();

        match cleanup_part_files(&self.config.downloads_dir) {
            Ok(0) => {}
            Ok(n) => log::info!("Removed {n} stale partial downloads"),
            Err(e) => log::warn!("Cannot scan {}: {e}", self.config.downloads_dir.display()),
        }

        let mut tally = Tally::default();
        tally.report.tasks = tasks.len();
        for task in &tasks {
            tally.pages.entry(task.page_url.clone()).or_default().remaining += 1;
        }
        let jobs: Vec<Job> = tasks
            .into_iter()
            .map(|task| Job {
                target: self.target_path(&task),
                task,
            })
            .collect();

        let workers = self.config.download_workers.min(jobs.len()).max(1);
        log::info!(
            "Downloading {} files for {} pages with {workers} workers",
            fmt_num(jobs.len()),
            fmt_num(tally.pages.len())
        );

        let tally = Mutex::new(tally);
        let pb = self.progress.phase_bar("download", jobs.len() as u64);
        let queue = TaskQueue::new(jobs);
        let token = self.shutdown.token();

        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("download-{i}"))
            .build()
        {
            Ok(pool) => pool.install(|| {
                rayon::scope(|s| {
                    for _ in 0..workers {
                        s.spawn(|_| {
                            let _guard = self.shutdown.enter_worker();
                            loop {
                                if token.is_cancelled() {
                                    queue.close();
                                    break;
                                }
                                let Some(job) = queue.next() else { break };
                                let outcome = self.download_one(job, &token);
                                self.record(job, outcome, &tally, &pb, queue.total());
                            }
                        });
                    }
                });
            }),
            Err(e) => {
                log::error!("Failed to create download pool: {e}");
                while let Some(job) = queue.next() {
                    let outcome = TaskOutcome::Failed(CrawlError::TransientNetwork(format!(
                        "pool unavailable: {e}"
                    )));
                    self.record(job, outcome, &tally, &pb, queue.total());
                }
            }
        }
        pb.finish_and_clear();

        let mut report = tally.into_inner().unwrap_or_else(PoisonError::into_inner).report;
        let unclaimed = queue.unclaimed();
        if unclaimed > 0 {
            log::info!("{unclaimed} downloads not started because of shutdown");
            report.cancelled += unclaimed;
        }
        report.elapsed = start.elapsed();
        report
    }

    fn download_one(&self, job: &Job, token: &CancellationToken) -> TaskOutcome {
        let target = &job.target;
        if fs::metadata(target).is_ok_and(|m| m.is_file() && m.len() > 0) {
            log::debug!("Already downloaded: {}", target.display());
            return TaskOutcome::Existing;
        }
        if let Some(dir) = target.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                return TaskOutcome::Failed(CrawlError::resource(dir, e));
            }
        }

        let name = target.file_name().unwrap_or_default().to_string_lossy();
        let pb = self.progress.file_bar(&name);
        pb.set_message(job.task.file_type.to_string());
        let result = self.fetcher.fetch(&job.task.file_url, target, token, &pb);
        pb.finish_and_clear();

        match result {
            Ok(bytes) => {
                log::debug!("Downloaded {} ({bytes} bytes)", target.display());
                TaskOutcome::Downloaded(bytes)
            }
            Err(CrawlError::Cancelled) => TaskOutcome::Cancelled,
            Err(e) => TaskOutcome::Failed(e),
        }
    }

    /// Fold one outcome into the tally and commit the page once complete.
    fn record(
        &self,
        job: &Job,
        outcome: TaskOutcome,
        tally: &Mutex<Tally>,
        pb: &ProgressBar,
        total: usize,
    ) {
        let page_url = &job.task.page_url;
        let commit = {
            let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
            let report = &mut tally.report;
            match &outcome {
                TaskOutcome::Downloaded(bytes) => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                TaskOutcome::Existing => report.existing += 1,
                TaskOutcome::Failed(e) => {
                    report.failed += 1;
                    log::warn!("Download failed for {page_url} ({}): {e}", job.task.file_type);
                }
                TaskOutcome::Cancelled => report.cancelled += 1,
            }
            tally.finished += 1;
            let finished = tally.finished;

            let page = tally.pages.entry(page_url.clone()).or_default();
            page.remaining = page.remaining.saturating_sub(1);
            page.failed |= matches!(outcome, TaskOutcome::Failed(_));
            page.cancelled |= matches!(outcome, TaskOutcome::Cancelled);
            let commit = match page {
                PageTally { remaining: 0, cancelled: true, .. } => None,
                PageTally { remaining: 0, failed: true, .. } => Some(DownloadStatus::Failed),
                PageTally { remaining: 0, .. } => Some(DownloadStatus::Done),
                _ => None,
            };
            match commit {
                Some(DownloadStatus::Done) => tally.report.pages_done += 1,
                Some(DownloadStatus::Failed) => tally.report.pages_failed += 1,
                _ => {}
            }

            if !self.progress.is_tty() && finished % LOG_EVERY == 0 {
                log::info!("Downloaded {}/{} files", fmt_num(finished), fmt_num(total));
            }
            commit
        };

        pb.inc(1);
        if let Some(status) = commit {
            self.ledger.set_download_status(page_url, status);
        }
    }
}

//! CSV-backed work ledger.
//!
//! All rows live in memory behind one mutex, indexed by page URL. Every
//! mutation is persisted before the lock is released: a new key appends a
//! single CSV line, an update rewrites the file through `<ledger>.tmp` and
//! an atomic rename. A crash can therefore lose at most the row being
//! written, never corrupt the rows before it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::item::{CollectionStatus, DownloadStatus, DownloadTask, WorkItem, now_timestamp};
use crate::summary::LedgerCounts;

/// Fixed column order of the ledger file
pub const LEDGER_HEADER: [&str; 6] = [
    "timestamp",
    "page_url",
    "doc_url",
    "pdf_url",
    "collection_status",
    "download_status",
];

/// Older files named the collection column differently.
const COLLECTION_STATUS_ALIASES: [&str; 3] = ["collection_status", "url_status", "status"];

/// Which recorded rows a collection pass leaves alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipPolicy {
    /// Skip only pages whose downloads are DONE
    Done,
    /// Skip FOUND and SKIPPED pages; FAILED pages are collected again
    Found,
    /// Skip every page that has left PENDING
    #[default]
    Settled,
}

impl SkipPolicy {
    fn skips(self, item: &WorkItem) -> bool {
        match self {
            Self::Done => item.download_status == DownloadStatus::Done,
            Self::Found => matches!(
                item.collection_status,
                CollectionStatus::Found | CollectionStatus::Skipped
            ) || item.download_status == DownloadStatus::Done,
            Self::Settled => item.collection_status != CollectionStatus::Pending,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    rows: Vec<WorkItem>,
    index: FxHashMap<String, usize>,
    mutations: u64,
    /// A previous write failed; the next persist rewrites everything
    dirty: bool,
    /// Closed by shutdown; later writes are dropped
    sealed: bool,
}

impl LedgerState {
    fn insert(&mut self, item: WorkItem) -> usize {
        let idx = self.rows.len();
        self.index.insert(item.page_url.clone(), idx);
        self.rows.push(item);
        idx
    }
}

enum Persist {
    Append(usize),
    Rewrite,
}

/// Persistent table of work items keyed by page URL.
pub struct WorkLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl std::fmt::Debug for WorkLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkLedger")
            .field("path", &self.path)
            .field("rows", &self.len())
            .finish()
    }
}

impl WorkLedger {
    /// Open the ledger at `path`, creating it with the fixed header if absent.
    ///
    /// Legacy column names are accepted, duplicate rows collapse to the last
    /// occurrence, and a truncated trailing line is skipped. When any of
    /// these were seen the file is compacted in place. Failing here is the
    /// only fatal ledger error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut state = LedgerState::default();

        if path.exists() {
            let irregular = load(&path, &mut state)
                .with_context(|| format!("failed to read ledger {}", path.display()))?;
            if irregular {
                log::info!("Compacting ledger {} ({} rows)", path.display(), state.rows.len());
                rewrite(&path, &state.rows)
                    .with_context(|| format!("failed to compact ledger {}", path.display()))?;
            }
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            rewrite(&path, &[])
                .with_context(|| format!("failed to create ledger {}", path.display()))?;
        }

        log::debug!("Ledger {} opened with {} rows", path.display(), state.rows.len());
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the change, falling back to a full rewrite after an earlier
    /// failure. Errors are logged, never returned.
    fn persist(&self, state: &mut LedgerState, change: Persist) {
        let result = match change {
            Persist::Append(from) if !state.dirty => append(&self.path, &state.rows[from..]),
            _ => rewrite(&self.path, &state.rows),
        };
        match result {
            Ok(()) => state.dirty = false,
            Err(e) => {
                log::error!("Ledger write to {} failed: {e:#}", self.path.display());
                state.dirty = true;
            }
        }
    }

    /// Add PENDING rows for URLs not yet in the ledger, in one write.
    ///
    /// Returns how many rows were added.
    pub fn register_pending<S: AsRef<str>>(&self, urls: &[S]) -> usize {
        let mut state = self.lock();
        if state.sealed {
            log::warn!("Ledger closed, ignoring {} new URLs", urls.len());
            return 0;
        }
        let first_new = state.rows.len();
        for url in urls {
            let url = url.as_ref().trim();
            if !url.is_empty() && !state.index.contains_key(url) {
                state.insert(WorkItem::pending(url));
            }
        }
        let added = state.rows.len() - first_new;
        if added > 0 {
            state.mutations += 1;
            self.persist(&mut state, Persist::Append(first_new));
        }
        added
    }

    /// Record a collection outcome with a fresh download status.
    ///
    /// Shorthand for [`upsert_row`](Self::upsert_row) with `NOT_STARTED`.
    pub fn upsert(
        &self,
        page_url: &str,
        doc_url: Option<&str>,
        pdf_url: Option<&str>,
        collection_status: CollectionStatus,
    ) -> CollectionStatus {
        self.upsert_row(WorkItem {
            timestamp: String::new(),
            page_url: page_url.to_string(),
            doc_url: doc_url.map(str::to_string),
            pdf_url: pdf_url.map(str::to_string),
            collection_status,
            download_status: DownloadStatus::NotStarted,
        })
    }

    /// Overwrite the row for `item.page_url` (timestamp refreshed), or append
    /// it if unseen. Returns the collection status actually stored.
    ///
    /// FOUND without any link is stored as FAILED.
    pub fn upsert_row(&self, item: WorkItem) -> CollectionStatus {
        let mut state = self.lock();
        self.upsert_locked(&mut state, item)
    }

    /// Commit a batch of outcomes, one persisted write per row.
    pub fn upsert_many(&self, items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut state = self.lock();
        let mut applied = 0;
        for item in items {
            if state.sealed {
                log::warn!("Ledger closed, dropping remaining batch results");
                break;
            }
            self.upsert_locked(&mut state, item);
            applied += 1;
        }
        applied
    }

    fn upsert_locked(&self, state: &mut LedgerState, mut item: WorkItem) -> CollectionStatus {
        if state.sealed {
            log::warn!("Ledger closed, ignoring update for {}", item.page_url);
            return item.collection_status;
        }
        item.doc_url = item.doc_url.filter(|u| !u.trim().is_empty());
        item.pdf_url = item.pdf_url.filter(|u| !u.trim().is_empty());
        if item.collection_status == CollectionStatus::Found
            && item.doc_url.is_none()
            && item.pdf_url.is_none()
        {
            log::warn!("{}: FOUND without any link, storing FAILED", item.page_url);
            item.collection_status = CollectionStatus::Failed;
        }
        item.timestamp = now_timestamp();
        let status = item.collection_status;

        state.mutations += 1;
        match state.index.get(&item.page_url).copied() {
            Some(idx) => {
                state.rows[idx] = item;
                self.persist(state, Persist::Rewrite);
            }
            None => {
                let idx = state.insert(item);
                self.persist(state, Persist::Append(idx));
            }
        }
        status
    }

    /// Update only the download status of a known page.
    ///
    /// Unknown pages are ignored with a warning; returns whether a row changed.
    pub fn set_download_status(&self, page_url: &str, status: DownloadStatus) -> bool {
        let mut state = self.lock();
        if state.sealed {
            log::warn!("Ledger closed, ignoring download status for {page_url}");
            return false;
        }
        let Some(idx) = state.index.get(page_url).copied() else {
            log::warn!("URL not in ledger: {page_url}");
            return false;
        };
        let row = &mut state.rows[idx];
        row.download_status = status;
        row.timestamp = now_timestamp();
        state.mutations += 1;
        self.persist(&mut state, Persist::Rewrite);
        log::debug!("Download status for {page_url} set to {status}");
        true
    }

    /// One task per non-empty link of every FOUND + NOT_STARTED row.
    pub fn pending_downloads(&self) -> Vec<DownloadTask> {
        self.lock()
            .rows
            .iter()
            .filter(|item| item.is_pending_download())
            .flat_map(WorkItem::download_tasks)
            .collect()
    }

    pub fn failed_collection_urls(&self) -> Vec<String> {
        self.urls_with(CollectionStatus::Failed)
    }

    /// Rows still waiting for collection
    pub fn pending_collection_urls(&self) -> Vec<String> {
        self.urls_with(CollectionStatus::Pending)
    }

    fn urls_with(&self, status: CollectionStatus) -> Vec<String> {
        self.lock()
            .rows
            .iter()
            .filter(|item| item.collection_status == status)
            .map(|item| item.page_url.clone())
            .collect()
    }

    /// `candidates` minus pages already handled under `policy`.
    ///
    /// Keeps candidate order and drops duplicates.
    pub fn unprocessed<S: AsRef<str>>(&self, candidates: &[S], policy: SkipPolicy) -> Vec<String> {
        let state = self.lock();
        let mut seen = rustc_hash::FxHashSet::default();
        candidates
            .iter()
            .map(|c| c.as_ref().trim())
            .filter(|url| !url.is_empty() && seen.insert(*url))
            .filter(|url| {
                state
                    .index
                    .get(*url)
                    .is_none_or(|&idx| !policy.skips(&state.rows[idx]))
            })
            .map(str::to_string)
            .collect()
    }

    pub fn counts(&self) -> LedgerCounts {
        LedgerCounts::from_items(self.lock().rows.iter())
    }

    pub fn get(&self, page_url: &str) -> Option<WorkItem> {
        let state = self.lock();
        state.index.get(page_url).map(|&idx| state.rows[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of mutations applied since open
    pub fn mutations(&self) -> u64 {
        self.lock().mutations
    }

    /// Re-persist after an earlier failed write. Returns whether the file is
    /// up to date.
    pub fn flush(&self) -> bool {
        let mut state = self.lock();
        if state.dirty {
            self.persist(&mut state, Persist::Rewrite);
        }
        !state.dirty
    }

    /// Flush and refuse further writes. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        if state.dirty {
            self.persist(&mut state, Persist::Rewrite);
        }
        state.sealed = true;
        log::debug!("Ledger {} closed", self.path.display());
    }
}

/// Read rows into `state`. Returns whether the file needs compaction.
fn load(path: &Path, state: &mut LedgerState) -> Result<bool> {
    let mut irregular = !ends_with_newline(path)?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(true);
    }
    if headers.iter().ne(LEDGER_HEADER) {
        irregular = true;
    }

    let column = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
    };
    let Some(page_col) = column(&["page_url"]) else {
        bail!("no page_url column in header");
    };
    let ts_col = column(&["timestamp"]);
    let doc_col = column(&["doc_url"]);
    let pdf_col = column(&["pdf_url"]);
    let status_col = column(&COLLECTION_STATUS_ALIASES);
    let download_col = column(&["download_status"]);

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Skipping unreadable ledger line: {e}");
                irregular = true;
                continue;
            }
        };
        let line = record.position().map_or(0, |p| p.line());
        if record.len() < headers.len() {
            log::warn!("Skipping truncated ledger line {line}");
            irregular = true;
            continue;
        }
        let field = |col: Option<usize>| col.and_then(|c| record.get(c)).unwrap_or("").trim();

        let page_url = field(Some(page_col));
        if page_url.is_empty() {
            irregular = true;
            continue;
        }
        let statuses = field(status_col)
            .parse::<CollectionStatus>()
            .and_then(|c| field(download_col).parse::<DownloadStatus>().map(|d| (c, d)));
        let (collection_status, download_status) = match statuses {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Skipping ledger line {line}: {e}");
                irregular = true;
                continue;
            }
        };
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let timestamp = match field(ts_col) {
            "" => now_timestamp(),
            ts => ts.to_string(),
        };

        let item = WorkItem {
            timestamp,
            page_url: page_url.to_string(),
            doc_url: non_empty(field(doc_col)),
            pdf_url: non_empty(field(pdf_col)),
            collection_status,
            download_status,
        };
        match state.index.get(&item.page_url).copied() {
            Some(idx) => {
                state.rows[idx] = item;
                irregular = true;
            }
            None => {
                state.insert(item);
            }
        }
    }
    Ok(irregular)
}

fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn append(path: &Path, rows: &[WorkItem]) -> Result<()> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    for row in rows {
        writer.write_record(row.to_record())?;
    }
    writer.flush()?;
    Ok(())
}

/// Full rewrite via tmp file + atomic rename
fn rewrite(path: &Path, rows: &[WorkItem]) -> Result<()> {
    let tmp = tmp_path(path);
    let file = File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(LEDGER_HEADER)?;
    for row in rows {
        writer.write_record(row.to_record())?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush {}: {}", tmp.display(), e.error()))?;
    file.sync_all()?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FileType;
    use std::sync::Arc;

    fn ledger_in(dir: &tempfile::TempDir) -> WorkLedger {
        WorkLedger::open(dir.path().join("download_urls.csv")).unwrap()
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        assert!(ledger.is_empty());
        assert_eq!(
            lines(ledger.path()),
            vec!["timestamp,page_url,doc_url,pdf_url,collection_status,download_status"]
        );
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = WorkLedger::open(dir.path().join("state/nested/ledger.csv")).unwrap();
        assert!(ledger.path().exists());
    }

    #[test]
    fn upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        for _ in 0..3 {
            ledger.upsert("https://x/1", Some("https://s/1.doc"), None, CollectionStatus::Found);
        }
        assert_eq!(ledger.len(), 1);
        assert_eq!(lines(ledger.path()).len(), 2);

        let reopened = ledger_in(&dir);
        let item = reopened.get("https://x/1").unwrap();
        assert_eq!(item.collection_status, CollectionStatus::Found);
        assert_eq!(item.doc_url.as_deref(), Some("https://s/1.doc"));
        assert_eq!(item.pdf_url, None);
    }

    #[test]
    fn found_without_links_stored_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        let stored = ledger.upsert("https://x/2", Some(""), None, CollectionStatus::Found);
        assert_eq!(stored, CollectionStatus::Failed);
        assert_eq!(ledger.failed_collection_urls(), vec!["https://x/2"]);
    }

    #[test]
    fn pending_downloads_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.upsert(
            "https://x/1",
            Some("https://s/1.doc"),
            Some("https://s/1.pdf"),
            CollectionStatus::Found,
        );
        ledger.upsert("https://x/2", None, Some("https://s/2.pdf"), CollectionStatus::Found);
        ledger.upsert("https://x/3", None, None, CollectionStatus::Failed);
        ledger.set_download_status("https://x/2", DownloadStatus::Done);

        let tasks = ledger.pending_downloads();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.page_url == "https://x/1"));
        let mut types: Vec<_> = tasks.iter().map(|t| t.file_type).collect();
        types.sort();
        assert_eq!(types, vec![FileType::Doc, FileType::Pdf]);
    }

    #[test]
    fn set_download_status_unknown_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        assert!(!ledger.set_download_status("https://nowhere", DownloadStatus::Done));
        assert_eq!(ledger.mutations(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn register_pending_skips_known() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.upsert("https://x/1", Some("d"), None, CollectionStatus::Found);
        let added = ledger.register_pending(&["https://x/1", "https://x/2", "https://x/2", " "]);
        assert_eq!(added, 1);
        assert_eq!(ledger.pending_collection_urls(), vec!["https://x/2"]);
        assert_eq!(
            ledger.get("https://x/1").unwrap().collection_status,
            CollectionStatus::Found
        );
    }

    #[test]
    fn skip_policies() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.register_pending(&["https://x/0"]);
        ledger.upsert("https://x/1", Some("d"), None, CollectionStatus::Found);
        ledger.upsert("https://x/2", None, None, CollectionStatus::Failed);
        ledger.upsert("https://x/3", Some("d"), None, CollectionStatus::Found);
        ledger.set_download_status("https://x/3", DownloadStatus::Done);

        let seeds = ["https://x/0", "https://x/1", "https://x/2", "https://x/3", "https://x/4"];
        assert_eq!(
            ledger.unprocessed(&seeds, SkipPolicy::Done),
            vec!["https://x/0", "https://x/1", "https://x/2", "https://x/4"]
        );
        assert_eq!(
            ledger.unprocessed(&seeds, SkipPolicy::Found),
            vec!["https://x/0", "https://x/2", "https://x/4"]
        );
        assert_eq!(
            ledger.unprocessed(&seeds, SkipPolicy::Settled),
            vec!["https://x/0", "https://x/4"]
        );
    }

    #[test]
    fn legacy_alias_and_duplicates_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_urls.csv");
        fs::write(
            &path,
            "timestamp,page_url,doc_url,pdf_url,url_status,download_status\n\
             2024-01-01 10:00:00,https://x/1,,,FAILED,NOT_STARTED\n\
             2024-01-01 10:05:00,https://x/2,,https://s/2.pdf,FOUND,\n\
             2024-01-01 10:09:00,https://x/1,https://s/1.doc,,FOUND,NOT_STARTED\n",
        )
        .unwrap();

        let ledger = WorkLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        let first = ledger.get("https://x/1").unwrap();
        assert_eq!(first.collection_status, CollectionStatus::Found);
        assert_eq!(first.timestamp, "2024-01-01 10:09:00");
        assert_eq!(
            ledger.get("https://x/2").unwrap().download_status,
            DownloadStatus::NotStarted
        );

        let compacted = lines(&path);
        assert_eq!(compacted[0], LEDGER_HEADER.join(","));
        assert_eq!(compacted.len(), 3);
    }

    #[test]
    fn truncated_trailing_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_urls.csv");
        fs::write(
            &path,
            "timestamp,page_url,doc_url,pdf_url,collection_status,download_status\n\
             2024-01-01 10:00:00,https://x/1,https://s/1.doc,,FOUND,NOT_STARTED\n\
             2024-01-01 10:01:00,https://x/2,https://s/2",
        )
        .unwrap();

        let ledger = WorkLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get("https://x/2").is_none());

        // Appends after compaction start on a fresh line
        ledger.upsert("https://x/3", None, Some("https://s/3.pdf"), CollectionStatus::Found);
        let reopened = WorkLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get("https://x/3").is_some());
    }

    #[test]
    fn close_seals_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.upsert("https://x/1", Some("d"), None, CollectionStatus::Found);
        ledger.close();
        ledger.close();
        ledger.upsert("https://x/2", Some("d"), None, CollectionStatus::Found);
        assert!(!ledger.set_download_status("https://x/1", DownloadStatus::Done));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger_in(&dir).len(), 1);
    }

    #[test]
    fn write_failure_marks_dirty_then_flush_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.upsert("https://x/1", Some("d"), None, CollectionStatus::Found);

        // Block the tmp path so the rewrite fails
        let tmp = tmp_path(ledger.path());
        fs::create_dir(&tmp).unwrap();
        ledger.set_download_status("https://x/1", DownloadStatus::Done);
        assert!(!ledger.flush());
        assert_eq!(
            ledger.get("https://x/1").unwrap().download_status,
            DownloadStatus::Done
        );

        fs::remove_dir(&tmp).unwrap();
        assert!(ledger.flush());
        assert_eq!(
            ledger_in(&dir).get("https://x/1").unwrap().download_status,
            DownloadStatus::Done
        );
    }

    #[test]
    fn concurrent_upserts_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(ledger_in(&dir));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let url = format!("https://x/{t}-{i}");
                        ledger.upsert(&url, Some("d"), None, CollectionStatus::Found);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.len(), 100);
        assert_eq!(ledger_in(&dir).len(), 100);
        assert_eq!(lines(ledger.path()).len(), 101);
    }
}

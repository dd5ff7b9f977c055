//! lawcrawl-ledger: persistent work queue for the crawl pipeline
//!
//! One CSV row per page URL records collection and download progress.
//! The ledger is the sole checkpoint: a restarted run re-reads it and
//! resumes where the previous one stopped.

pub mod item;
pub mod ledger;
pub mod summary;

pub use item::{CollectionStatus, DownloadStatus, DownloadTask, FileType, WorkItem};
pub use ledger::{LEDGER_HEADER, SkipPolicy, WorkLedger};
pub use summary::{ExitSummary, LedgerCounts};

//! Thread-safe accumulator of discovered downloads

use std::sync::{Mutex, PoisonError};

use lawcrawl_ledger::{DownloadTask, FileType};

/// Downloads discovered during collection, in commit order.
#[derive(Debug, Default)]
pub struct DiscoveryLog {
    entries: Mutex<Vec<DownloadTask>>,
}

impl DiscoveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one batch of discoveries atomically.
    pub fn append(&self, batch: impl IntoIterator<Item = DownloadTask>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(batch);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(doc, pdf)` counts
    pub fn counts(&self) -> (usize, usize) {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let docs = entries.iter().filter(|t| t.file_type == FileType::Doc).count();
        (docs, entries.len() - docs)
    }

    pub fn snapshot(&self) -> Vec<DownloadTask> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

//! Work item model: one row per page URL

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Timestamp format of the `timestamp` column (local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of link collection for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionStatus {
    Pending,
    Found,
    Failed,
    Skipped,
}

/// Outcome of downloading a page's files. Only meaningful when the page
/// is [`CollectionStatus::Found`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    #[default]
    NotStarted,
    Done,
    Failed,
}

impl CollectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Found => "FOUND",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy files wrote an empty collection status for rows still queued.
impl FromStr for CollectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "PENDING" => Ok(Self::Pending),
            "FOUND" => Ok(Self::Found),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(format!("unknown collection status: {other:?}")),
        }
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NOT_STARTED" => Ok(Self::NotStarted),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown download status: {other:?}")),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Local time of the last mutation, [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
    /// Unique key
    pub page_url: String,
    pub doc_url: Option<String>,
    pub pdf_url: Option<String>,
    pub collection_status: CollectionStatus,
    pub download_status: DownloadStatus,
}

impl WorkItem {
    /// Fresh PENDING row for a newly seen page URL.
    pub fn pending(page_url: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            page_url: page_url.into(),
            doc_url: None,
            pdf_url: None,
            collection_status: CollectionStatus::Pending,
            download_status: DownloadStatus::NotStarted,
        }
    }

    /// Whether the page still has files waiting to be fetched
    pub fn is_pending_download(&self) -> bool {
        self.collection_status == CollectionStatus::Found
            && self.download_status == DownloadStatus::NotStarted
    }

    /// One task per non-empty link.
    pub fn download_tasks(&self) -> Vec<DownloadTask> {
        let mut tasks = Vec::with_capacity(2);
        for (file_type, url) in [(FileType::Doc, &self.doc_url), (FileType::Pdf, &self.pdf_url)] {
            if let Some(file_url) = url.as_deref().filter(|u| !u.is_empty()) {
                tasks.push(DownloadTask {
                    page_url: self.page_url.clone(),
                    file_url: file_url.to_string(),
                    file_type,
                });
            }
        }
        tasks
    }

    pub(crate) fn to_record(&self) -> [&str; 6] {
        [
            &self.timestamp,
            &self.page_url,
            self.doc_url.as_deref().unwrap_or(""),
            self.pdf_url.as_deref().unwrap_or(""),
            self.collection_status.as_str(),
            self.download_status.as_str(),
        ]
    }
}

/// Kind of downloadable document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Doc,
    Pdf,
}

impl FileType {
    /// Directory name under the downloads root
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Pdf => "pdf",
        }
    }

    /// File extension written to disk
    pub fn extension(self) -> &'static str {
        match self {
            Self::Doc => "docx",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A single file to fetch, derived from a FOUND row at dispatch time.
///
/// The target path is not stored: it depends on the download root and the
/// page's file stem, so the download scheduler resolves it through
/// [`DownloadTask::target_path`] when it builds its job list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadTask {
    pub page_url: String,
    pub file_url: String,
    pub file_type: FileType,
}

impl DownloadTask {
    /// `<root>/<file_type>/<stem>.<ext>`
    pub fn target_path(&self, root: &Path, stem: &str) -> PathBuf {
        root.join(self.file_type.dir_name())
            .join(format!("{stem}.{}", self.file_type.extension()))
    }
}

/// Current local time in [`TIMESTAMP_FORMAT`]
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

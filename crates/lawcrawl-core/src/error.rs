//! Error taxonomy shared by the collection and download phases

use std::path::PathBuf;

/// Error from processing a single page URL or download task.
///
/// Task-level errors never escape a worker: the schedulers convert them into
/// a ledger status update. Only [`CrawlError::Authentication`] during setup
/// aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Connection reset, DNS failure, non-200 status, stalled read
    #[error("network: {0}")]
    TransientNetwork(String),

    /// Page did not load or render within the navigation timeout
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// Local disk or permission problem
    #[error("IO on {}: {source}", .path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No valid session can be established
    #[error("authentication: {0}")]
    Authentication(String),

    /// Produced by cooperative shutdown
    #[error("cancelled")]
    Cancelled,
}

impl CrawlError {
    pub fn navigation(url: &str, message: impl std::fmt::Display) -> Self {
        Self::Navigation {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source,
        }
    }

    /// Create network error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::TransientNetwork(format!("HTTP {}: {e}", status.as_u16())),
            None => Self::TransientNetwork(e.to_string()),
        }
    }

    /// Whether another attempt with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Navigation { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

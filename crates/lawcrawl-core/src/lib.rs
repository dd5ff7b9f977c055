//! Lawcrawl Core - Common infrastructure for the crawl pipeline
//!
//! This crate provides the reusable pieces shared by the collection and
//! download phases: logging, progress display, cancellation and shutdown,
//! retry policy, the error taxonomy and HTTP streaming.

pub mod error;
pub mod http;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod shutdown;

// Re-exports for convenience
pub use error::CrawlError;
pub use http::{
    BROWSER_USER_AGENT, DownloadOutcome, HttpConfig, SHARED_RUNTIME, cleanup_part_files,
    http_client, set_http_config, stream_to_file,
};
pub use logging::{CrawlLogger, init_logging, prune_old_logs};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use queue::{TaskQueue, partition_batches};
pub use retry::RetryPolicy;
pub use shutdown::{
    CancellationToken, DrainOutcome, EXIT_INTERRUPTED, ShutdownCoordinator, ShutdownState,
};

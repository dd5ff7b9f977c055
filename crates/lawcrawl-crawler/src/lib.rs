//! Lawcrawl Crawler - collection and download schedulers
//!
//! Page URLs are collected in batches, one browser session per batch, and
//! the discovered files are downloaded on a separate bounded pool. All
//! progress goes through the [`WorkLedger`](lawcrawl_ledger::WorkLedger).
//!
//! The browser, seed source, link extractor and file fetcher are traits so
//! the schedulers can run against in-memory fakes.

#[cfg(feature = "browser")]
pub mod chrome;
pub mod collect;
pub mod config;
pub mod discovery;
pub mod download;
pub mod extractor;
pub mod naming;
pub mod runner;
pub mod seeds;
pub mod session;
pub mod stats;

// Re-exports
#[cfg(feature = "browser")]
pub use chrome::{ChromeLauncher, ChromeSession};
pub use collect::{Collaborators, CollectionScheduler, UrlOutcome};
pub use config::{BrowserOptions, CrawlConfig, SiteConfig};
pub use discovery::DiscoveryLog;
pub use download::{DownloadScheduler, Fetcher, HttpFetcher, TaskOutcome};
pub use extractor::{ExtractedLinks, PageExtractor, StaticLinkExtractor, extract_links};
pub use naming::document_stem;
pub use runner::{
    ConsolePrompt, Crawler, FixedAnswer, PassOutcome, Prompt, RunMode, RunReport,
};
pub use seeds::{BatchFolderSeeds, SeedSource, StaticSeeds};
pub use session::{
    BrowserSession, Cookie, CookieSessionProvider, Credentials, SessionFactory, SessionProvider,
};
pub use stats::{CollectionReport, DownloadReport};

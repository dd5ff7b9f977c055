//! Crawler runtime configuration

use std::path::PathBuf;
use std::time::Duration;

use lawcrawl_core::RetryPolicy;
use lawcrawl_ledger::SkipPolicy;

/// Hard upper bound on concurrent browser instances
pub const MAX_COLLECT_WORKERS: usize = 8;
/// Hard upper bound on concurrent downloads
pub const MAX_DOWNLOAD_WORKERS: usize = 8;

/// Page navigation timeout bounds (seconds)
pub const PAGE_TIMEOUT_RANGE: (u64, u64) = (30, 120);

fn cpu_count() -> usize {
    std::thread::available_parallelism().map_or(2, |n| n.get())
}

/// `clamp(cpu - 1, 2, 4)`
pub fn default_collect_workers() -> usize {
    cpu_count().saturating_sub(1).clamp(2, 4)
}

/// `clamp(min(cpu * 2, 8), 4, 8)`
pub fn default_download_workers() -> usize {
    (cpu_count() * 2).min(MAX_DOWNLOAD_WORKERS).clamp(4, MAX_DOWNLOAD_WORKERS)
}

/// Site-specific knobs for session checks and link extraction.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Home page used to verify login
    pub base_url: String,
    /// Host serving the downloadable documents
    pub static_host: String,
    /// CSS selectors present only for a logged-in user (any match counts)
    pub logged_in_markers: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://luatvietnam.vn/".into(),
            static_host: "static.luatvietnam.vn".into(),
            logged_in_markers: vec![
                "img.avata-user".into(),
                "a[title='Trang cá nhân']".into(),
                "div[title*='@']".into(),
            ],
        }
    }
}

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub page_timeout: Duration,
    /// Extra command-line flags passed to Chrome
    pub extra_args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            page_timeout: Duration::from_secs(60),
            extra_args: Vec::new(),
        }
    }
}

/// Everything the crawler needs at runtime, resolved from file and flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub ledger_path: PathBuf,
    pub downloads_dir: PathBuf,
    pub seeds_dir: PathBuf,
    pub cookies_path: PathBuf,
    pub site: SiteConfig,
    pub browser: BrowserOptions,
    pub collect_workers: usize,
    pub download_workers: usize,
    /// Wall-clock budget of one collection batch
    pub batch_timeout: Duration,
    pub retry: RetryPolicy,
    pub skip_policy: SkipPolicy,
    /// Bound on operator-approved retry passes
    pub max_retry_rounds: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("download_urls.csv"),
            downloads_dir: PathBuf::from("downloads"),
            seeds_dir: PathBuf::from("batches"),
            cookies_path: PathBuf::from("auth_cookies.json"),
            site: SiteConfig::default(),
            browser: BrowserOptions::default(),
            collect_workers: default_collect_workers(),
            download_workers: default_download_workers(),
            batch_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            skip_policy: SkipPolicy::default(),
            max_retry_rounds: 10,
        }
    }
}

impl CrawlConfig {
    /// Clamp values into their supported ranges, warning about each change.
    pub fn normalized(mut self) -> Self {
        let (lo, hi) = PAGE_TIMEOUT_RANGE;
        let secs = self.browser.page_timeout.as_secs();
        if !(lo..=hi).contains(&secs) {
            let clamped = secs.clamp(lo, hi);
            log::warn!("Page timeout {secs}s out of range, using {clamped}s");
            self.browser.page_timeout = Duration::from_secs(clamped);
        }
        if self.collect_workers == 0 || self.collect_workers > MAX_COLLECT_WORKERS {
            let clamped = self.collect_workers.clamp(1, MAX_COLLECT_WORKERS);
            log::warn!("Collection workers {} out of range, using {clamped}", self.collect_workers);
            self.collect_workers = clamped;
        }
        if self.download_workers == 0 || self.download_workers > MAX_DOWNLOAD_WORKERS {
            let clamped = self.download_workers.clamp(1, MAX_DOWNLOAD_WORKERS);
            log::warn!("Download workers {} out of range, using {clamped}", self.download_workers);
            self.download_workers = clamped;
        }
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_bounds() {
        let c = default_collect_workers();
        assert!((2..=4).contains(&c));
        let d = default_download_workers();
        assert!((4..=8).contains(&d));
    }

    #[test]
    fn normalized_clamps() {
        let cfg = CrawlConfig {
            collect_workers: 32,
            download_workers: 0,
            browser: BrowserOptions {
                page_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.collect_workers, MAX_COLLECT_WORKERS);
        assert_eq!(cfg.download_workers, 1);
        assert_eq!(cfg.browser.page_timeout, Duration::from_secs(30));
    }

    #[test]
    fn defaults_match_site() {
        let cfg = CrawlConfig::default();
        assert_eq!(cfg.batch_timeout, Duration::from_secs(300));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.skip_policy, SkipPolicy::Settled);
        assert_eq!(cfg.site.static_host, "static.luatvietnam.vn");
    }
}

//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use lawcrawl_core::{HttpConfig, RetryPolicy};
use lawcrawl_crawler::config::{default_collect_workers, default_download_workers};
use lawcrawl_crawler::{BrowserOptions, CrawlConfig, SiteConfig};
use lawcrawl_ledger::SkipPolicy;
use serde::Deserialize;

/// Global configuration for lawcrawl
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub site: SiteSection,
    pub browser: BrowserSection,
    pub workers: WorkersConfig,
    pub timeouts: TimeoutsConfig,
    pub retry: RetryConfig,
    /// File this config was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub ledger: PathBuf,
    pub downloads: PathBuf,
    pub seeds: PathBuf,
    pub cookies: PathBuf,
    pub credentials: PathBuf,
    pub logs: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ledger: PathBuf::from("download_urls.csv"),
            downloads: PathBuf::from("downloads"),
            seeds: PathBuf::from("batches"),
            cookies: PathBuf::from("auth_cookies.json"),
            credentials: PathBuf::from("credentials.json"),
            logs: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    pub base_url: String,
    pub static_host: String,
    pub logged_in_markers: Vec<String>,
}

impl Default for SiteSection {
    fn default() -> Self {
        let site = SiteConfig::default();
        Self {
            base_url: site.base_url,
            static_host: site.static_host,
            logged_in_markers: site.logged_in_markers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub headless: bool,
    /// Seconds
    pub page_timeout: u64,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub chrome_executable: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: true,
            page_timeout: 60,
            chrome_executable: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub collect: usize,
    pub download: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            collect: default_collect_workers(),
            download: default_download_workers(),
        }
    }
}

/// All values in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub batch: u64,
    pub grace: u64,
    pub connect: u64,
    pub read: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            batch: 300,
            grace: 30,
            connect: 30,
            read: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Bound on operator-approved collection retry passes
    pub max_rounds: usize,
    pub skip: SkipPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
            max_rounds: 10,
            skip: SkipPolicy::default(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./lawcrawl.toml (current directory)
    /// 2. ~/.config/lawcrawl/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("lawcrawl.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "lawcrawl") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn site_config(&self) -> SiteConfig {
        SiteConfig {
            base_url: self.site.base_url.clone(),
            static_host: self.site.static_host.clone(),
            logged_in_markers: self.site.logged_in_markers.clone(),
        }
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            headless: self.browser.headless,
            chrome_executable: self.browser.chrome_executable.as_ref().map(PathBuf::from),
            page_timeout: Duration::from_secs(self.browser.page_timeout),
            extra_args: self.browser.extra_args.clone(),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.timeouts.connect),
            read_timeout: Duration::from_secs(self.timeouts.read),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.timeouts.grace)
    }

    /// Crawler settings before CLI overrides and clamping
    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            ledger_path: self.paths.ledger.clone(),
            downloads_dir: self.paths.downloads.clone(),
            seeds_dir: self.paths.seeds.clone(),
            cookies_path: self.paths.cookies.clone(),
            site: self.site_config(),
            browser: self.browser_options(),
            collect_workers: self.workers.collect,
            download_workers: self.workers.download,
            batch_timeout: Duration::from_secs(self.timeouts.batch),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base: Duration::from_millis(self.retry.backoff_ms),
            },
            skip_policy: self.retry.skip,
            max_retry_rounds: self.retry.max_rounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.paths.ledger, PathBuf::from("download_urls.csv"));
        assert_eq!(config.timeouts.batch, 300);
        assert_eq!(config.timeouts.grace, 30);
        assert!(config.browser.headless);
        assert!(config.workers.collect >= 2);
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("LAWCRAWL_TEST_CHROME", "/opt/chrome");
        assert_eq!(
            expand_env_var("${LAWCRAWL_TEST_CHROME}"),
            Some("/opt/chrome".to_string())
        );
        std::env::remove_var("LAWCRAWL_TEST_CHROME");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[paths]
downloads = "/data/laws"

[browser]
headless = false
page_timeout = 90

[workers]
collect = 3
download = 6

[retry]
max_attempts = 5
skip = "found"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.paths.downloads, PathBuf::from("/data/laws"));
        assert_eq!(config.paths.seeds, PathBuf::from("batches"));

        let crawl = config.crawl_config();
        assert!(!crawl.browser.headless);
        assert_eq!(crawl.browser.page_timeout, Duration::from_secs(90));
        assert_eq!(crawl.collect_workers, 3);
        assert_eq!(crawl.download_workers, 6);
        assert_eq!(crawl.retry.max_attempts, 5);
        assert_eq!(crawl.retry.base, Duration::from_secs(2));
        assert_eq!(crawl.skip_policy, SkipPolicy::Found);
        assert_eq!(crawl.batch_timeout, Duration::from_secs(300));
    }

    #[test]
    fn from_file_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lawcrawl.toml");
        std::fs::write(&path, "[site]\nstatic_host = \"files.example.vn\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert_eq!(config.site_config().static_host, "files.example.vn");
        assert_eq!(config.site.base_url, "https://luatvietnam.vn/");
    }
}

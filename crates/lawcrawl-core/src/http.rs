//! HTTP file streaming with read-stall detection.
//!
//! Uses async reqwest internally on a small shared tokio runtime, but
//! presents a sync interface so rayon workers can call it directly.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::ProgressBar;

use crate::error::CrawlError;
use crate::progress::upgrade_to_bar;
use crate::shutdown::CancellationToken;

/// Desktop Chrome user agent sent with every request
pub const BROWSER_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
);

/// Write buffer size for streamed bodies
pub const CHUNK_SIZE: usize = 8192;

/// Suffix for in-progress downloads
const PART_SUFFIX: &str = "part";

/// Network timeouts, set once at startup.
#[derive(Clone, Copy, Debug)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// No data for this long = stalled download
    pub read_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install global HTTP settings. Only the first call takes effect.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already set, ignoring");
    }
}

pub fn http_config() -> HttpConfig {
    HTTP_CONFIG.get().copied().unwrap_or_default()
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(http_config().connect_timeout)
        .user_agent(BROWSER_USER_AGENT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP and browser (CDP) operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("lawcrawl-io")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Result of a completed transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub bytes: u64,
}

/// Path of the in-progress file for `target`
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    target.with_file_name(name)
}

/// HTTP GET `url` and stream the body into `target`.
///
/// The body lands in `<target>.part` and is renamed on success, so a
/// non-empty `target` always means a complete file. Any non-200 status, an
/// empty body or a stalled read is a [`CrawlError::TransientNetwork`].
pub fn stream_to_file(
    url: &str,
    target: &Path,
    token: &CancellationToken,
    pb: &ProgressBar,
) -> Result<DownloadOutcome, CrawlError> {
    let part = part_path(target);
    let result = SHARED_RUNTIME.block_on(fetch_into(url, &part, token, pb));
    match result {
        Ok(bytes) => {
            fs::rename(&part, target).map_err(|e| CrawlError::resource(target, e))?;
            Ok(DownloadOutcome { bytes })
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

async fn fetch_into(
    url: &str,
    part: &Path,
    token: &CancellationToken,
    pb: &ProgressBar,
) -> Result<u64, CrawlError> {
    let read_timeout = http_config().read_timeout;

    let response = SHARED_CLIENT
        .get(url)
        .send()
        .await
        .map_err(|e| CrawlError::from_reqwest(&e))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(CrawlError::TransientNetwork(format!(
            "HTTP {} for {url}",
            status.as_u16()
        )));
    }
    if let Some(total) = response.content_length() {
        upgrade_to_bar(pb, total);
    }

    let file = File::create(part).map_err(|e| CrawlError::resource(part, e))?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        let next = tokio::time::timeout(read_timeout, stream.next())
            .await
            .map_err(|_| {
                CrawlError::TransientNetwork(format!(
                    "read timeout ({}s with no data) for {url}",
                    read_timeout.as_secs()
                ))
            })?;
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| CrawlError::from_reqwest(&e))?;
        writer
            .write_all(&chunk)
            .map_err(|e| CrawlError::resource(part, e))?;
        written += chunk.len() as u64;
        pb.inc(chunk.len() as u64);
    }

    if written == 0 {
        return Err(CrawlError::TransientNetwork(format!("empty body for {url}")));
    }

    let file = writer
        .into_inner()
        .map_err(|e| CrawlError::resource(part, e.into_error()))?;
    file.sync_all().map_err(|e| CrawlError::resource(part, e))?;
    Ok(written)
}

/// Remove stale `.part` files left behind by an interrupted run
pub fn cleanup_part_files(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            removed += cleanup_part_files(&path)?;
        } else if path.extension().is_some_and(|ext| ext == PART_SUFFIX) {
            log::warn!("Removing stale partial download: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

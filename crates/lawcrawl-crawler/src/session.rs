//! Browser session seams and cookie-backed authentication.
//!
//! The schedulers only see [`BrowserSession`] and [`SessionFactory`]; the
//! Chrome implementation lives in `chrome.rs` and tests substitute in-memory
//! fakes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use lawcrawl_core::CrawlError;
use lawcrawl_ledger::item::now_timestamp;
use serde::{Deserialize, Serialize};

use crate::config::SiteConfig;

/// Environment variable holding the identity-provider e-mail
pub const EMAIL_ENV: &str = "LAWCRAWL_EMAIL";
/// Environment variable holding the identity-provider password
pub const PASSWORD_ENV: &str = "LAWCRAWL_PASSWORD";

/// Browser cookie as persisted in the cookie file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since epoch; absent or negative for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

fn root_path() -> String {
    "/".into()
}

/// One isolated browser instance, owned by a single worker.
pub trait BrowserSession: Send {
    /// Navigate to `url` and return the rendered HTML.
    ///
    /// Exceeding `timeout` is a [`CrawlError::Navigation`].
    fn render(&mut self, url: &str, timeout: Duration) -> Result<String, CrawlError>;

    fn cookies(&mut self) -> Result<Vec<Cookie>, CrawlError>;

    fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), CrawlError>;

    /// Close the browser and release its process. Idempotent.
    fn shutdown(&mut self);
}

/// Launches isolated browser sessions.
pub trait SessionFactory: Send + Sync {
    fn launch(&self) -> Result<Box<dyn BrowserSession>, CrawlError>;
}

/// Supplies an authenticated browsing context.
pub trait SessionProvider: Send + Sync {
    /// Load saved session state into `session`; false when none was usable
    fn restore(&self, session: &mut dyn BrowserSession) -> bool;

    /// Whether `session` is logged in
    fn ensure_authenticated(&self, session: &mut dyn BrowserSession) -> bool;

    /// Save the session state for later runs
    fn persist(&self, session: &mut dyn BrowserSession) -> Result<(), CrawlError>;
}

#[derive(Serialize, Deserialize)]
struct CookieFile {
    cookies: Vec<Cookie>,
    #[serde(default)]
    timestamp: String,
}

/// Older cookie files were a bare array
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCookies {
    Wrapped(CookieFile),
    Bare(Vec<Cookie>),
}

/// Cookie-file backed [`SessionProvider`].
///
/// Login is verified by rendering the site home page and looking for any
/// of the logged-in marker selectors.
#[derive(Debug, Clone)]
pub struct CookieSessionProvider {
    cookie_path: PathBuf,
    site: SiteConfig,
    page_timeout: Duration,
}

impl CookieSessionProvider {
    pub fn new(cookie_path: impl Into<PathBuf>, site: SiteConfig, page_timeout: Duration) -> Self {
        Self {
            cookie_path: cookie_path.into(),
            site,
            page_timeout,
        }
    }

    pub fn cookie_path(&self) -> &Path {
        &self.cookie_path
    }

    /// Saved cookies; empty when the file is missing or unreadable.
    pub fn load_cookies(&self) -> Vec<Cookie> {
        let text = match fs::read_to_string(&self.cookie_path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No saved cookies at {}", self.cookie_path.display());
                return Vec::new();
            }
            Err(e) => {
                log::warn!("Cannot read {}: {e}", self.cookie_path.display());
                return Vec::new();
            }
        };
        match serde_json::from_str::<StoredCookies>(&text) {
            Ok(StoredCookies::Wrapped(file)) => file.cookies,
            Ok(StoredCookies::Bare(cookies)) => cookies,
            Err(e) => {
                log::warn!("Ignoring invalid cookie file {}: {e}", self.cookie_path.display());
                Vec::new()
            }
        }
    }

    /// Write cookies through a tmp file and rename.
    pub fn save_cookies(&self, cookies: Vec<Cookie>) -> anyhow::Result<()> {
        if let Some(parent) = self.cookie_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = CookieFile {
            cookies,
            timestamp: now_timestamp(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.cookie_path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.cookie_path)
            .with_context(|| format!("failed to rename to {}", self.cookie_path.display()))?;
        Ok(())
    }

    /// Whether rendered `html` shows a logged-in user.
    pub fn is_logged_in(&self, html: &str) -> bool {
        let doc = scraper::Html::parse_document(html);
        self.site.logged_in_markers.iter().any(|marker| {
            match scraper::Selector::parse(marker) {
                Ok(sel) => doc.select(&sel).next().is_some(),
                Err(e) => {
                    log::warn!("Invalid logged-in marker {marker:?}: {e:?}");
                    false
                }
            }
        })
    }
}

impl SessionProvider for CookieSessionProvider {
    fn restore(&self, session: &mut dyn BrowserSession) -> bool {
        let cookies = self.load_cookies();
        if cookies.is_empty() {
            return false;
        }
        match session.set_cookies(&cookies) {
            Ok(()) => {
                log::debug!("Restored {} cookies", cookies.len());
                true
            }
            Err(e) => {
                log::warn!("Failed to restore cookies: {e}");
                false
            }
        }
    }

    fn ensure_authenticated(&self, session: &mut dyn BrowserSession) -> bool {
        match session.render(&self.site.base_url, self.page_timeout) {
            Ok(html) => {
                let ok = self.is_logged_in(&html);
                if ok {
                    log::debug!("Login verified");
                } else {
                    log::warn!("Not logged in at {}", self.site.base_url);
                }
                ok
            }
            Err(e) => {
                log::warn!("Login check failed: {e}");
                false
            }
        }
    }

    fn persist(&self, session: &mut dyn BrowserSession) -> Result<(), CrawlError> {
        let cookies = session.cookies()?;
        let n = cookies.len();
        self.save_cookies(cookies).map_err(|e| {
            CrawlError::resource(
                &self.cookie_path,
                std::io::Error::other(format!("{e:#}")),
            )
        })?;
        log::info!("Saved {n} cookies to {}", self.cookie_path.display());
        Ok(())
    }
}

/// Identity-provider credentials. The password never appears in `Debug`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read credentials once: environment first, then the JSON file.
    ///
    /// Returns `None` when neither source has both values.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if let (Ok(email), Ok(password)) = (std::env::var(EMAIL_ENV), std::env::var(PASSWORD_ENV)) {
            if !email.is_empty() && !password.is_empty() {
                log::info!("Using credentials from environment");
                return Ok(Some(Self { email, password }));
            }
        }
        Self::from_file(path)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
        };
        let creds: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid credentials file {}", path.display()))?;
        if creds.email.is_empty() || creds.password.is_empty() {
            return Ok(None);
        }
        log::info!("Credentials file found at {}", path.display());
        Ok(Some(creds))
    }

    /// Save to `path`, readable only by the owner on Unix.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)
            .with_context(|| format!("cannot write {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        log::info!("Credentials saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dir: &tempfile::TempDir) -> CookieSessionProvider {
        CookieSessionProvider::new(
            dir.path().join("auth_cookies.json"),
            SiteConfig::default(),
            Duration::from_secs(30),
        )
    }

    fn cookie(name: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: "v".into(),
            domain: ".luatvietnam.vn".into(),
            path: "/".into(),
            secure: true,
            http_only: false,
            expires: None,
        }
    }

    #[test]
    fn cookies_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(&dir);
        assert!(p.load_cookies().is_empty());
        p.save_cookies(vec![cookie("sid"), cookie("lang")]).unwrap();
        let loaded = p.load_cookies();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "sid");
    }

    #[test]
    fn bare_array_cookie_file_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(&dir);
        fs::write(
            p.cookie_path(),
            r#"[{"name":"sid","value":"1","domain":".luatvietnam.vn"}]"#,
        )
        .unwrap();
        let loaded = p.load_cookies();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, "/");
    }

    #[test]
    fn corrupt_cookie_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(&dir);
        fs::write(p.cookie_path(), "{not json").unwrap();
        assert!(p.load_cookies().is_empty());
    }

    #[test]
    fn logged_in_marker_detection() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(&dir);
        assert!(p.is_logged_in(
            r#"<html><body><img class="avata-user" src="a.png"></body></html>"#
        ));
        assert!(p.is_logged_in(r#"<a title="Trang cá nhân" href="/me">me</a>"#));
        assert!(!p.is_logged_in(r#"<span>/ Đăng nhập</span>"#));
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let c = Credentials {
            email: "a@b.c".into(),
            password: "hunter2".into(),
        };
        let dbg = format!("{c:?}");
        assert!(dbg.contains("a@b.c"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn credentials_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        assert!(Credentials::from_file(&path).unwrap().is_none());
        Credentials {
            email: "a@b.c".into(),
            password: "pw".into(),
        }
        .save(&path)
        .unwrap();
        let loaded = Credentials::from_file(&path).unwrap().unwrap();
        assert_eq!(loaded.email, "a@b.c");
        assert_eq!(loaded.password, "pw");
    }
}

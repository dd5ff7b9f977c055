//! Chrome DevTools backed [`BrowserSession`].
//!
//! Workers are plain threads, so every CDP call is driven through
//! [`SHARED_RUNTIME`] with `block_on`. The CDP handler runs as a task on the
//! same runtime. The shutdown terminator kills the Chrome process and
//! aborts the handler, which unblocks a worker stuck in navigation.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetCookiesParams, SetUserAgentOverrideParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use lawcrawl_core::shutdown::TerminatorGuard;
use lawcrawl_core::{BROWSER_USER_AGENT, CrawlError, SHARED_RUNTIME, ShutdownCoordinator};
use tokio::task::JoinHandle;

use crate::config::{BrowserOptions, SiteConfig};
use crate::session::{BrowserSession, Cookie, Credentials, SessionFactory};

/// Budget for a polite browser close before killing the process
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between DOM polls
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for the logged-in marker after submitting the password
const LOGIN_CONFIRM_TIMEOUT: Duration = Duration::from_secs(45);

/// Identity-provider host opened in the login popup
const IDP_HOST: &str = "accounts.google.com";

/// Clicks the "Đăng nhập" (sign in) entry in the site header
const OPEN_LOGIN_JS: &str = r#"(() => {
    const el = [...document.querySelectorAll('span, a')]
        .find(e => e.textContent && e.textContent.includes('Đăng nhập'));
    if (el) { el.click(); return true; }
    return false;
})()"#;

const GOOGLE_BUTTON: &str = "form#form0 a.login-google";
const EMAIL_INPUT: &str = "input#identifierId";
const PASSWORD_INPUT: &str = "input[name='Passwd']";

const DEFAULT_ARGS: [&str; 6] = [
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-infobars",
    "--no-sandbox",
];

fn cdp(e: CdpError) -> CrawlError {
    CrawlError::TransientNetwork(format!("cdp: {e}"))
}

/// Launches one Chrome process per session.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    options: BrowserOptions,
    shutdown: Option<ShutdownCoordinator>,
}

impl ChromeLauncher {
    /// Sessions register a kill hook with `shutdown` when given.
    pub fn new(options: BrowserOptions, shutdown: Option<ShutdownCoordinator>) -> Self {
        Self { options, shutdown }
    }

    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }
}

impl SessionFactory for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        if self.shutdown.as_ref().is_some_and(|s| s.is_shutdown_requested()) {
            return Err(CrawlError::Cancelled);
        }
        let session = ChromeSession::launch(&self.options, self.shutdown.as_ref())?;
        Ok(Box::new(session))
    }
}

/// Shared with the terminator so it can kill the process from another thread
type BrowserSlot = Arc<Mutex<Option<Browser>>>;

/// One Chrome process with a single working tab.
pub struct ChromeSession {
    browser: BrowserSlot,
    page: Page,
    handler: JoinHandle<()>,
    _terminator: Option<TerminatorGuard>,
}

impl ChromeSession {
    pub fn launch(
        options: &BrowserOptions,
        shutdown: Option<&ShutdownCoordinator>,
    ) -> Result<Self, CrawlError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(options.page_timeout)
            .window_size(1920, 1080);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &options.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        for arg in DEFAULT_ARGS {
            builder = builder.arg(arg);
        }
        for arg in &options.extra_args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| CrawlError::TransientNetwork(format!("browser config: {e}")))?;

        log::debug!("Launching Chrome (headless={})", options.headless);
        let (browser, mut handler) = SHARED_RUNTIME
            .block_on(Browser::launch(config))
            .map_err(|e| CrawlError::TransientNetwork(format!("browser launch: {e}")))?;

        let handler = SHARED_RUNTIME.spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = SHARED_RUNTIME.block_on(async {
            let page = browser.new_page("about:blank").await?;
            page.execute(SetUserAgentOverrideParams::new(BROWSER_USER_AGENT))
                .await?;
            Ok::<_, CdpError>(page)
        });
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(cdp(e));
            }
        };

        let browser: BrowserSlot = Arc::new(Mutex::new(Some(browser)));
        let terminator = shutdown.map(|s| {
            let abort = handler.abort_handle();
            let browser = Arc::clone(&browser);
            s.register_terminator(move || {
                kill(&browser);
                abort.abort();
            })
        });

        Ok(Self {
            browser,
            page,
            handler,
            _terminator: terminator,
        })
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        SHARED_RUNTIME.block_on(fut)
    }

    fn is_closed(&self) -> bool {
        lock(&self.browser).is_none()
    }

    /// Log in through the Google popup.
    ///
    /// Opens the site, starts the Google sign-in, fills both credential
    /// steps and waits for a logged-in marker on the site page.
    pub fn sign_in(
        &mut self,
        site: &SiteConfig,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<(), CrawlError> {
        if self.is_closed() {
            return Err(CrawlError::Authentication("browser already closed".into()));
        }
        let browser = &self.browser;
        let page = &self.page;
        let base_url = site.base_url.as_str();

        SHARED_RUNTIME.block_on(async {
            tokio::time::timeout(timeout, page.goto(base_url))
                .await
                .map_err(|_| CrawlError::navigation(base_url, "timed out"))?
                .map_err(|e| CrawlError::navigation(base_url, e))?;

            let opened = poll(timeout, || async move {
                page.evaluate(OPEN_LOGIN_JS.to_string())
                    .await
                    .ok()
                    .and_then(|r| r.into_value::<bool>().ok())
                    .filter(|clicked| *clicked)
            })
            .await;
            if opened.is_none() {
                return Err(CrawlError::Authentication("sign-in link not found".into()));
            }

            let button = poll(timeout, || async move {
                page.find_element(GOOGLE_BUTTON).await.ok()
            })
            .await
            .ok_or_else(|| CrawlError::Authentication("Google sign-in button not found".into()))?;
            button.click().await.map_err(cdp)?;

            let popup = poll(timeout, || async move { find_idp_page(browser).await })
                .await
                .ok_or_else(|| {
                    CrawlError::Authentication("identity provider window not found".into())
                })?;
            log::debug!("Identity provider window opened");

            let email = poll(timeout, || {
                let popup = &popup;
                async move { popup.find_element(EMAIL_INPUT).await.ok() }
            })
            .await
            .ok_or_else(|| CrawlError::Authentication("e-mail field not found".into()))?;
            email.click().await.map_err(cdp)?;
            email.type_str(&credentials.email).await.map_err(cdp)?;
            email.press_key("Enter").await.map_err(cdp)?;

            // The password step replaces the e-mail step in place
            tokio::time::sleep(Duration::from_secs(2)).await;
            let password = poll(timeout, || {
                let popup = &popup;
                async move { popup.find_element(PASSWORD_INPUT).await.ok() }
            })
            .await
            .ok_or_else(|| CrawlError::Authentication("password field not found".into()))?;
            password.click().await.map_err(cdp)?;
            password.type_str(&credentials.password).await.map_err(cdp)?;
            password.press_key("Enter").await.map_err(cdp)?;
            log::info!("Credentials submitted, waiting for the site to confirm login...");

            let markers = &site.logged_in_markers;
            poll(LOGIN_CONFIRM_TIMEOUT, || async move {
                for marker in markers {
                    if page.find_element(marker.as_str()).await.is_ok() {
                        return Some(());
                    }
                }
                None
            })
            .await
            .ok_or_else(|| {
                CrawlError::Authentication("login was not confirmed by the site".into())
            })
        })
    }
}

fn lock(slot: &Mutex<Option<Browser>>) -> MutexGuard<'_, Option<Browser>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Kill the Chrome process if it is still running.
///
/// Called from the shutdown thread, never from inside the runtime.
fn kill(slot: &Mutex<Option<Browser>>) {
    let Some(mut browser) = lock(slot).take() else {
        return;
    };
    log::debug!("Killing browser process");
    SHARED_RUNTIME.block_on(async {
        let _ = browser.kill().await;
    });
}

/// First open tab on the identity provider
async fn find_idp_page(slot: &Mutex<Option<Browser>>) -> Option<Page> {
    let pages = {
        let browser = lock(slot);
        browser.as_ref()?.pages().await.ok()?
    };
    for page in pages {
        if let Ok(Some(url)) = page.url().await {
            if url.contains(IDP_HOST) {
                return Some(page);
            }
        }
    }
    None
}

/// Re-run `probe` every [`POLL_INTERVAL`] until it yields a value or
/// `timeout` elapses.
async fn poll<T, F, Fut>(timeout: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

impl BrowserSession for ChromeSession {
    fn render(&mut self, url: &str, timeout: Duration) -> Result<String, CrawlError> {
        let page = &self.page;
        let result = self.block_on(tokio::time::timeout(timeout, async {
            page.goto(url).await?;
            let html = page.content().await?;
            Ok::<_, CdpError>(html)
        }));
        match result {
            Ok(Ok(html)) => Ok(html),
            Ok(Err(e)) => Err(CrawlError::navigation(url, e)),
            Err(_) => Err(CrawlError::navigation(
                url,
                format!("timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    fn cookies(&mut self) -> Result<Vec<Cookie>, CrawlError> {
        let cookies = self.block_on(self.page.get_cookies()).map_err(cdp)?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: (c.expires > 0.0).then_some(c.expires),
            })
            .collect())
    }

    fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), CrawlError> {
        let mut params = Vec::with_capacity(cookies.len());
        for c in cookies {
            match CookieParam::builder()
                .name(c.name.as_str())
                .value(c.value.as_str())
                .domain(c.domain.as_str())
                .path(c.path.as_str())
                .secure(c.secure)
                .http_only(c.http_only)
                .build()
            {
                Ok(param) => params.push(param),
                Err(e) => log::warn!("Skipping cookie {}: {e}", c.name),
            }
        }
        if params.is_empty() {
            return Ok(());
        }
        self.block_on(self.page.execute(SetCookiesParams::new(params)))
            .map_err(cdp)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        let Some(mut browser) = lock(&self.browser).take() else {
            return;
        };
        SHARED_RUNTIME.block_on(async {
            let closed = matches!(
                tokio::time::timeout(CLOSE_TIMEOUT, browser.close()).await,
                Ok(Ok(_))
            );
            let exited = closed
                && matches!(
                    tokio::time::timeout(CLOSE_TIMEOUT, browser.wait()).await,
                    Ok(Ok(_))
                );
            if !exited {
                log::debug!("Browser did not exit cleanly, killing it");
                let _ = browser.kill().await;
            }
        });
        self.handler.abort();
        self._terminator = None;
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Login subcommand - interactive sign-in and cookie setup

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::Term;
use lawcrawl_core::{CrawlError, ShutdownCoordinator};
use lawcrawl_crawler::{
    BrowserOptions, BrowserSession, ChromeSession, CookieSessionProvider, Credentials,
    SessionProvider, SiteConfig,
};

use crate::config::Config;

/// Budget for the whole sign-in flow
const LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Show the browser window
    #[arg(long)]
    pub no_headless: bool,
}

pub fn run(args: LoginArgs, config: &Config, shutdown: &ShutdownCoordinator) -> Result<()> {
    let mut options = config.browser_options();
    options.headless &= !args.no_headless;
    let site = config.site_config();
    let provider =
        CookieSessionProvider::new(&config.paths.cookies, site.clone(), options.page_timeout);
    let credentials = credentials(&config.paths.credentials)?;
    sign_in(&options, &site, &provider, &credentials, shutdown)?;
    eprintln!("Logged in, session saved to {}", provider.cookie_path().display());
    Ok(())
}

/// Credentials from the environment or file, else asked on the terminal and
/// saved for next time.
pub fn credentials(path: &Path) -> Result<Credentials> {
    if let Some(creds) = Credentials::load(path)? {
        return Ok(creds);
    }
    log::info!("No stored credentials, asking on the terminal");
    let term = Term::stderr();
    term.write_str("Google e-mail: ")?;
    let email = term.read_line().context("cannot read e-mail")?;
    term.write_str("Password: ")?;
    let password = term.read_secure_line().context("cannot read password")?;

    let creds = Credentials {
        email: email.trim().to_string(),
        password,
    };
    if creds.email.is_empty() || creds.password.is_empty() {
        anyhow::bail!("e-mail and password are required to log in");
    }
    if let Err(e) = creds.save(path) {
        log::warn!("Could not save credentials: {e:#}");
    }
    Ok(creds)
}

/// Log in and persist the session cookies.
///
/// A failed headless attempt is repeated once with a visible window.
pub fn sign_in(
    options: &BrowserOptions,
    site: &SiteConfig,
    provider: &CookieSessionProvider,
    credentials: &Credentials,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    match attempt(options, site, provider, credentials, shutdown) {
        Ok(()) => Ok(()),
        Err(e) if options.headless && !e.is_cancelled() => {
            log::warn!("Headless login failed ({e}), retrying with a visible browser");
            let visible = BrowserOptions {
                headless: false,
                ..options.clone()
            };
            attempt(&visible, site, provider, credentials, shutdown).context("login failed")
        }
        Err(e) => Err(e).context("login failed"),
    }
}

fn attempt(
    options: &BrowserOptions,
    site: &SiteConfig,
    provider: &CookieSessionProvider,
    credentials: &Credentials,
    shutdown: &ShutdownCoordinator,
) -> Result<(), CrawlError> {
    if shutdown.is_shutdown_requested() {
        return Err(CrawlError::Cancelled);
    }
    log::info!("Logging in (headless={})", options.headless);
    let mut session = ChromeSession::launch(options, Some(shutdown))?;
    let result = session
        .sign_in(site, credentials, LOGIN_TIMEOUT)
        .and_then(|()| provider.persist(&mut session));
    session.shutdown();
    result
}

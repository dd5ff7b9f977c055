//! lawcrawl - legal document crawler
//!
//! Collects document download links from a logged-in site with headless
//! Chrome and downloads the files, keeping all progress in a CSV ledger so
//! interrupted runs resume where they stopped.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lawcrawl_core::ShutdownCoordinator;

mod cmd;
mod config;

use config::Config;

/// Log files older than this are deleted at startup
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Parser)]
#[command(name = "lawcrawl")]
#[command(about = "Legal document crawler with resumable CSV ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./lawcrawl.toml or ~/.config/lawcrawl/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Collect links and download documents
    Crawl(cmd::crawl::CrawlArgs),
    /// Log in and save the browser session
    Login(cmd::login::LoginArgs),
    /// Show ledger totals
    Status,
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // Progress context (TTY auto-detect)
    let progress = Arc::new(lawcrawl_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, the log file keeps info
    //   non-TTY: info unless --debug
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    let log_file = config.paths.logs.join("crawler.log");
    lawcrawl_core::init_logging(quiet, cli.debug, multi, Some(&log_file));
    if let Err(e) = lawcrawl_core::prune_old_logs(&config.paths.logs, LOG_RETENTION) {
        log::warn!("Cannot prune old logs: {e}");
    }
    match &config.source {
        Some(path) => log::info!("Loaded config from {}", path.display()),
        None => log::debug!("No config file found, using defaults"),
    }

    lawcrawl_core::set_http_config(config.http_config());

    let shutdown = ShutdownCoordinator::new(config.grace_period());
    if let Err(e) = shutdown.install_signal_handlers() {
        log::warn!("Cannot install signal handlers: {e}");
    }

    match cli.command {
        Command::Crawl(args) => cmd::crawl::run(args, &config, &shutdown, &progress),
        Command::Login(args) => {
            cmd::login::run(args, &config, &shutdown)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            cmd::status::run(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let crawl = config.crawl_config().normalized();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let path = |p: &std::path::Path| p.display().to_string();
    table.add_row(vec![
        "Config file",
        &config.source.as_deref().map_or("(defaults)".into(), path),
    ]);
    table.add_row(vec!["Ledger", &path(&crawl.ledger_path)]);
    table.add_row(vec!["Downloads", &path(&crawl.downloads_dir)]);
    table.add_row(vec!["Seeds", &path(&crawl.seeds_dir)]);
    table.add_row(vec!["Cookies", &path(&crawl.cookies_path)]);
    table.add_row(vec!["Logs", &path(&config.paths.logs)]);
    table.add_row(vec!["Site", &crawl.site.base_url]);
    table.add_row(vec!["Static host", &crawl.site.static_host]);
    table.add_row(vec![
        "Headless",
        if crawl.browser.headless { "yes" } else { "no" },
    ]);
    table.add_row(vec![
        "Page timeout",
        &format!("{}s", crawl.browser.page_timeout.as_secs()),
    ]);
    table.add_row(vec![
        "Workers",
        &format!(
            "{} browsers, {} downloads",
            crawl.collect_workers, crawl.download_workers
        ),
    ]);
    table.add_row(vec![
        "Batch timeout",
        &format!("{}s", crawl.batch_timeout.as_secs()),
    ]);
    table.add_row(vec!["Grace period", &format!("{}s", config.timeouts.grace)]);
    table.add_row(vec![
        "Retry",
        &format!(
            "{} attempts, {}ms base, {} rounds",
            crawl.retry.max_attempts,
            crawl.retry.base.as_millis(),
            crawl.max_retry_rounds
        ),
    ]);
    table.add_row(vec!["Skip policy", &format!("{:?}", crawl.skip_policy)]);
    let credentials = if std::env::var_os(lawcrawl_crawler::session::EMAIL_ENV).is_some() {
        "environment"
    } else if config.paths.credentials.exists() {
        "file"
    } else {
        "not set"
    };
    table.add_row(vec!["Credentials", credentials]);

    eprintln!("\n{table}");
}

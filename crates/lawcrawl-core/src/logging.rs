//! Logging with indicatif integration and an optional log file tee

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use indicatif::MultiProgress;

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through indicatif MultiProgress (when attached) and
/// appends every record to a log file.
pub struct CrawlLogger {
    inner: env_logger::Logger,
    console_level: log::LevelFilter,
    multi: Option<MultiProgress>,
    file: Option<Mutex<File>>,
}

impl CrawlLogger {
    pub fn new(
        inner: env_logger::Logger,
        console_level: log::LevelFilter,
        multi: Option<MultiProgress>,
        file: Option<File>,
    ) -> Self {
        Self {
            inner,
            console_level,
            multi,
            file: file.map(Mutex::new),
        }
    }
}

impl log::Log for CrawlLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }
        match &self.multi {
            _ if record.level() > self.console_level => {}
            Some(multi) => {
                let (pre, label, post) = level_style(record.level(), true);
                let line = format!("[{pre}{label}{post}] {}", record.args());
                multi.suspend(|| eprintln!("{line}"));
            }
            None => {
                let (_, label, _) = level_style(record.level(), false);
                eprintln!("[{label}] {}", record.args());
            }
        }
        if let Some(file) = &self.file {
            let (_, label, _) = level_style(record.level(), false);
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let mut f = file.lock().unwrap_or_else(|p| p.into_inner());
            let _ = writeln!(
                f,
                "{ts} [{}] {}: {}",
                label.trim_end(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        self.inner.flush();
        if let Some(file) = &self.file {
            let mut f = file.lock().unwrap_or_else(|p| p.into_inner());
            let _ = f.flush();
        }
    }
}

/// Initialize logging.
///
/// `quiet` lowers the console to warnings while the log file keeps `info`
/// (or `debug`). With `multi`, console output is routed through the
/// progress display. A log file that cannot be opened only disables the tee.
pub fn init_logging(
    quiet: bool,
    debug: bool,
    multi: Option<&MultiProgress>,
    log_file: Option<&Path>,
) {
    let default_level = if debug { "debug" } else { "info" };
    let console_level = if quiet && !debug {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Trace
    };

    let logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .build();
    let max_level = if log_file.is_some() {
        logger.filter()
    } else {
        logger.filter().min(console_level)
    };

    let mut open_error = None;
    let file = log_file.and_then(|path| match open_log_file(path) {
        Ok(f) => Some(f),
        Err(e) => {
            open_error = Some(format!("cannot open log file {}: {e}", path.display()));
            None
        }
    });

    let installed = log::set_boxed_logger(Box::new(CrawlLogger::new(
        logger,
        console_level,
        multi.cloned(),
        file,
    )));
    if installed.is_ok() {
        log::set_max_level(max_level);
    }
    if let Some(msg) = open_error {
        log::warn!("{msg}");
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Delete `*.log` files in `dir` last modified more than `max_age` ago.
pub fn prune_old_logs(dir: &Path, max_age: Duration) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == "log") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!("Pruned {removed} old log file(s) from {}", dir.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_labels_padded() {
        assert_eq!(level_style(log::Level::Warn, false), ("", "WARN ", ""));
        assert_eq!(level_style(log::Level::Error, true).1, "ERROR");
    }

    #[test]
    fn prune_keeps_fresh_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("crawler.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let removed = prune_old_logs(dir.path(), Duration::from_secs(7 * 24 * 3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("crawler.log").exists());
    }

    #[test]
    fn prune_removes_expired_logs_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.log"), "x").unwrap();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = prune_old_logs(dir.path(), Duration::from_millis(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("old.log").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn prune_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(&dir.path().join("logs"), Duration::ZERO).unwrap(), 0);
    }
}

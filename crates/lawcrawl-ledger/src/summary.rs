//! Ledger totals for status output and the exit summary

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use lawcrawl_core::progress::fmt_num;
use serde::Serialize;

use crate::item::{CollectionStatus, DownloadStatus, WorkItem};

/// Row totals by collection and download status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub total: usize,
    pub pending: usize,
    pub found: usize,
    pub failed: usize,
    pub skipped: usize,
    /// FOUND rows whose files are all on disk
    pub downloads_done: usize,
    pub downloads_failed: usize,
    /// FOUND rows not yet downloaded
    pub downloads_pending: usize,
}

impl LedgerCounts {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Self {
        let mut c = Self::default();
        for item in items {
            c.total += 1;
            match item.collection_status {
                CollectionStatus::Pending => c.pending += 1,
                CollectionStatus::Found => c.found += 1,
                CollectionStatus::Failed => c.failed += 1,
                CollectionStatus::Skipped => c.skipped += 1,
            }
            if item.collection_status != CollectionStatus::Found {
                continue;
            }
            match item.download_status {
                DownloadStatus::NotStarted => c.downloads_pending += 1,
                DownloadStatus::Done => c.downloads_done += 1,
                DownloadStatus::Failed => c.downloads_failed += 1,
            }
        }
        c
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Ledger")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Count").fg(Color::Cyan),
                Cell::new("%").fg(Color::Cyan),
            ]);

        let rows = [
            ("Pages", self.total, self.total),
            ("Pending", self.pending, self.total),
            ("Found", self.found, self.total),
            ("Failed", self.failed, self.total),
            ("Skipped", self.skipped, self.total),
            ("Downloads done", self.downloads_done, self.found),
            ("Downloads failed", self.downloads_failed, self.found),
            ("Downloads pending", self.downloads_pending, self.found),
        ];
        for (label, n, of) in rows {
            let color = match label {
                "Failed" | "Downloads failed" if n > 0 => Color::Red,
                "Found" | "Downloads done" => Color::Green,
                _ => Color::Reset,
            };
            table.add_row(vec![
                Cell::new(label),
                Cell::new(fmt_num(n)).fg(color),
                Cell::new(format!("{:.1}", pct(n, of))),
            ]);
        }
        table.to_string()
    }

    /// One-line summary for non-TTY logs.
    pub fn log(&self) {
        log::info!(
            concat!(
                "Ledger: {} pages, {} found, {} failed, {} pending | ",
                "downloads: {} done, {} failed, {} pending"
            ),
            fmt_num(self.total),
            fmt_num(self.found),
            fmt_num(self.failed),
            fmt_num(self.pending),
            fmt_num(self.downloads_done),
            fmt_num(self.downloads_failed),
            fmt_num(self.downloads_pending),
        );
    }
}

fn pct(n: usize, of: usize) -> f64 {
    if of == 0 {
        0.0
    } else {
        n as f64 / of as f64 * 100.0
    }
}

/// Durable record of how a run ended, one JSON object per line.
#[derive(Debug, Clone, Serialize)]
pub struct ExitSummary {
    pub timestamp: String,
    /// `completed`, `declined`, `interrupted`, `failed`
    pub reason: String,
    pub counts: LedgerCounts,
}

impl ExitSummary {
    pub fn new(reason: impl Into<String>, counts: LedgerCounts) -> Self {
        Self {
            timestamp: crate::item::now_timestamp(),
            reason: reason.into(),
            counts,
        }
    }

    /// Append as a JSON line to `path`, creating parent directories.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(self).map_err(io::Error::other)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(cs: CollectionStatus, ds: DownloadStatus) -> WorkItem {
        WorkItem {
            collection_status: cs,
            download_status: ds,
            ..WorkItem::pending("https://x")
        }
    }

    #[test]
    fn counts_by_status() {
        let items = vec![
            item(CollectionStatus::Pending, DownloadStatus::NotStarted),
            item(CollectionStatus::Found, DownloadStatus::NotStarted),
            item(CollectionStatus::Found, DownloadStatus::Done),
            item(CollectionStatus::Failed, DownloadStatus::NotStarted),
            item(CollectionStatus::Skipped, DownloadStatus::NotStarted),
        ];
        let c = LedgerCounts::from_items(&items);
        assert_eq!(c.total, 5);
        assert_eq!(c.found, 2);
        assert_eq!(c.downloads_done, 1);
        assert_eq!(c.downloads_pending, 1);
        // Download status of non-FOUND rows is not counted
        assert_eq!(c.downloads_failed, 0);
    }

    #[test]
    fn table_mentions_every_status() {
        let table = LedgerCounts {
            total: 1_200,
            found: 1_000,
            failed: 200,
            ..Default::default()
        }
        .format_table();
        assert!(table.contains("1,200"));
        assert!(table.contains("Downloads pending"));
    }

    #[test]
    fn exit_summary_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/summary.log");
        let counts = LedgerCounts {
            total: 2,
            found: 1,
            failed: 1,
            ..Default::default()
        };
        ExitSummary::new("interrupted", counts).append_to(&path).unwrap();
        ExitSummary::new("completed", counts).append_to(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["reason"], "interrupted");
        assert_eq!(v["counts"]["failed"], 1);
    }
}

//! Statistics collection and reporting for the crawl phases.
//!
//! - Collection: `CollectionReport` (per pass)
//! - Downloads: `DownloadReport`

use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use lawcrawl_core::progress::fmt_num;

fn header(title: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title)
                .fg(Color::Cyan)
                .add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table
}

fn row(table: &mut Table, label: &str, value: String) {
    table.add_row(vec![Cell::new(label), Cell::new(value)]);
}

// =============================================================================
// Collection
// =============================================================================

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// URLs handed to the pass
    pub submitted: usize,
    /// Seeds excluded as already processed
    pub skipped: usize,
    pub found: usize,
    pub failed: usize,
    /// URLs left PENDING by shutdown
    pub cancelled: usize,
    pub batches: usize,
    /// Batches failed in bulk (timeout, launch/auth failure, panic)
    pub failed_batches: usize,
    pub docs_discovered: usize,
    pub pdfs_discovered: usize,
    pub elapsed: Duration,
}

impl CollectionReport {
    pub fn format_table(&self) -> String {
        let mut table = header("Collection");
        row(&mut table, "URLs", fmt_num(self.submitted));
        row(&mut table, "Skipped (already processed)", fmt_num(self.skipped));
        row(&mut table, "Found", fmt_num(self.found));
        row(&mut table, "Failed", fmt_num(self.failed));
        if self.cancelled > 0 {
            row(&mut table, "Left pending", fmt_num(self.cancelled));
        }
        row(
            &mut table,
            "Batches",
            format!("{} ({} failed)", self.batches, self.failed_batches),
        );
        row(
            &mut table,
            "Discovered",
            format!("{} doc / {} pdf", self.docs_discovered, self.pdfs_discovered),
        );
        row(&mut table, "Elapsed", format!("{:.1}s", self.elapsed.as_secs_f64()));
        table.to_string()
    }

    pub fn log(&self) {
        log::info!(
            "Collection: {} URLs, {} found, {} failed, {} skipped, {} left pending [{:.1}s]",
            fmt_num(self.submitted),
            fmt_num(self.found),
            fmt_num(self.failed),
            fmt_num(self.skipped),
            fmt_num(self.cancelled),
            self.elapsed.as_secs_f64()
        );
    }
}

// =============================================================================
// Downloads
// =============================================================================

/// Outcome of one download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub tasks: usize,
    pub downloaded: usize,
    /// Already on disk, marked DONE without network access
    pub existing: usize,
    pub failed: usize,
    /// Interrupted or never started because of shutdown
    pub cancelled: usize,
    pub bytes: u64,
    pub pages_done: usize,
    pub pages_failed: usize,
    pub elapsed: Duration,
}

impl DownloadReport {
    pub fn format_table(&self) -> String {
        let mut table = header("Downloads");
        row(&mut table, "Files", fmt_num(self.tasks));
        row(&mut table, "Downloaded", fmt_num(self.downloaded));
        row(&mut table, "Already on disk", fmt_num(self.existing));
        row(&mut table, "Failed", fmt_num(self.failed));
        if self.cancelled > 0 {
            row(&mut table, "Cancelled", fmt_num(self.cancelled));
        }
        row(
            &mut table,
            "Pages",
            format!("{} done / {} failed", self.pages_done, self.pages_failed),
        );
        row(&mut table, "Bytes", fmt_bytes(self.bytes));
        row(&mut table, "Elapsed", format!("{:.1}s", self.elapsed.as_secs_f64()));
        table.to_string()
    }

    pub fn log(&self) {
        log::info!(
            "Downloads: {} files, {} downloaded, {} existing, {} failed, {} cancelled, {} [{:.1}s]",
            fmt_num(self.tasks),
            fmt_num(self.downloaded),
            fmt_num(self.existing),
            fmt_num(self.failed),
            fmt_num(self.cancelled),
            fmt_bytes(self.bytes),
            self.elapsed.as_secs_f64()
        );
    }
}

/// Binary byte size with one decimal
pub fn fmt_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

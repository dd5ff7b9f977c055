//! Seed URL sources

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use calamine::Reader;
use rustc_hash::FxHashSet;

/// Header names accepted as the URL column (case-insensitive)
const URL_COLUMNS: [&str; 4] = ["url", "urls", "link", "links"];

/// Batch file patterns, read in name order
const BATCH_PATTERNS: [&str; 2] = ["Batch_*.xlsx", "Batch_*.csv"];

/// Produces the candidate page URLs for a run.
pub trait SeedSource: Send + Sync {
    /// Unique candidate URLs in discovery order
    fn list_candidate_urls(&self) -> anyhow::Result<Vec<String>>;
}

/// `Batch_*.xlsx` and `Batch_*.csv` files in a folder.
///
/// Workbooks are read from their first sheet. Either format needs a header
/// row with a URL column.
#[derive(Debug, Clone)]
pub struct BatchFolderSeeds {
    dir: PathBuf,
}

impl BatchFolderSeeds {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn batch_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in BATCH_PATTERNS {
            let pattern = self.dir.join(pattern);
            let pattern_str = pattern.to_string_lossy();
            files.extend(
                glob::glob(&pattern_str)
                    .context("invalid glob pattern")?
                    .filter_map(|e| e.ok())
                    .filter(|p| p.is_file()),
            );
        }
        // Sort for deterministic seed order
        files.sort();
        Ok(files)
    }
}

impl SeedSource for BatchFolderSeeds {
    fn list_candidate_urls(&self) -> anyhow::Result<Vec<String>> {
        if !self.dir.is_dir() {
            bail!("Seed folder not found: {}", self.dir.display());
        }
        let mut seen = FxHashSet::default();
        let mut urls = Vec::new();
        for file in self.batch_files()? {
            let found = read_batch_file(&file)?;
            log::info!(
                "Read {} URLs from {}",
                found.len(),
                file.file_name().unwrap_or_default().to_string_lossy()
            );
            for url in found {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
        log::info!("Total unique URLs found: {}", urls.len());
        Ok(urls)
    }
}

/// URLs from the first URL-like column of one batch file
fn read_batch_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let is_xlsx = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
    if is_xlsx {
        read_xlsx(path)
    } else {
        read_csv(path)
    }
}

fn read_csv(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let col = url_column(headers.iter(), path)?;

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("bad row in {}", path.display()))?;
        if let Some(url) = record.get(col).and_then(as_url) {
            urls.push(url);
        }
    }
    Ok(urls)
}

fn read_xlsx(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut workbook = calamine::open_workbook_auto(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .with_context(|| format!("no worksheet in {}", path.display()))?
        .with_context(|| format!("cannot read {}", path.display()))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header.iter().map(ToString::to_string).collect();
    let col = url_column(headers.iter().map(String::as_str), path)?;

    Ok(rows
        .filter_map(|row| row.get(col))
        .filter_map(|cell| as_url(&cell.to_string()))
        .collect())
}

fn url_column<'h>(
    mut headers: impl Iterator<Item = &'h str>,
    path: &Path,
) -> anyhow::Result<usize> {
    match headers.position(|h| URL_COLUMNS.iter().any(|c| h.trim().eq_ignore_ascii_case(c))) {
        Some(col) => Ok(col),
        None => bail!("No URL column found in {}", path.display()),
    }
}

/// Trimmed cell value when it looks like a URL
fn as_url(value: &str) -> Option<String> {
    let value = value.trim();
    value
        .to_ascii_lowercase()
        .contains("http")
        .then(|| value.to_string())
}

/// Fixed in-memory seed list.
#[derive(Debug, Clone, Default)]
pub struct StaticSeeds(pub Vec<String>);

impl SeedSource for StaticSeeds {
    fn list_candidate_urls(&self) -> anyhow::Result<Vec<String>> {
        let mut seen = FxHashSet::default();
        Ok(self
            .0
            .iter()
            .filter(|u| seen.insert(u.as_str()))
            .cloned()
            .collect())
    }
}

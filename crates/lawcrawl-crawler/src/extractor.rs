//! Page link extraction

use std::time::Duration;

use lawcrawl_core::CrawlError;
use lawcrawl_ledger::{DownloadTask, FileType};
use scraper::{Html, Selector};

use crate::session::BrowserSession;

/// Download links found on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    pub doc_url: Option<String>,
    pub pdf_url: Option<String>,
}

impl ExtractedLinks {
    pub fn is_empty(&self) -> bool {
        self.doc_url.is_none() && self.pdf_url.is_none()
    }

    /// Tasks for the discovery log
    pub fn tasks(&self, page_url: &str) -> Vec<DownloadTask> {
        [(FileType::Doc, &self.doc_url), (FileType::Pdf, &self.pdf_url)]
            .into_iter()
            .filter_map(|(file_type, url)| {
                url.as_ref().map(|u| DownloadTask {
                    page_url: page_url.to_string(),
                    file_url: u.clone(),
                    file_type,
                })
            })
            .collect()
    }
}

/// Turns a rendered page into typed download links.
///
/// Recoverable failures are [`CrawlError::TransientNetwork`] or
/// [`CrawlError::Navigation`]; anything else is fatal for the URL.
pub trait PageExtractor: Send + Sync {
    fn extract(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<ExtractedLinks, CrawlError>;
}

/// Picks anchors pointing at the static-file host.
#[derive(Debug, Clone)]
pub struct StaticLinkExtractor {
    static_host: String,
    page_timeout: Duration,
}

impl StaticLinkExtractor {
    pub fn new(static_host: impl Into<String>, page_timeout: Duration) -> Self {
        Self {
            static_host: static_host.into(),
            page_timeout,
        }
    }
}

impl PageExtractor for StaticLinkExtractor {
    fn extract(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<ExtractedLinks, CrawlError> {
        let html = session.render(url, self.page_timeout)?;
        Ok(extract_links(&html, &self.static_host))
    }
}

/// First `.doc`/`.docx` and first `.pdf` anchor on `static_host`.
pub fn extract_links(html: &str, static_host: &str) -> ExtractedLinks {
    let doc = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return ExtractedLinks::default();
    };

    let mut links = ExtractedLinks::default();
    for href in doc.select(&anchors).filter_map(|a| a.value().attr("href")) {
        let href = href.trim();
        if !href.contains(static_host) {
            continue;
        }
        let path = href
            .split(['?', '#'])
            .next()
            .unwrap_or(href)
            .to_ascii_lowercase();
        if path.ends_with(".pdf") {
            links.pdf_url.get_or_insert_with(|| absolutize(href));
        } else if path.ends_with(".doc") || path.ends_with(".docx") {
            links.doc_url.get_or_insert_with(|| absolutize(href));
        }
        if links.doc_url.is_some() && links.pdf_url.is_some() {
            break;
        }
    }
    links
}

/// Protocol-relative hrefs (`//host/...`) get https
fn absolutize(href: &str) -> String {
    match href.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => href.to_string(),
    }
}

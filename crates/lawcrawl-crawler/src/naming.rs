//! File names for downloaded documents

use std::sync::LazyLock;

use regex::Regex;

/// Path after the host, up to `#`, `?` or `.html`
static PAGE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^/]+/([^#?]+?)(?:\.html?)?(?:[#?].*)?$")
        .expect("valid regex")
});

/// Trailing `-<id>-d<n>` document suffix
static ID_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)-d\d+$").expect("valid regex"));

/// Characters rejected by common filesystems
const ILLEGAL: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest stem kept, in chars
const MAX_STEM_CHARS: usize = 180;

/// Human-readable file stem for a document page.
///
/// `https://host/tai-chinh/thong-tu-80-2024-bo-tai-chinh-381826-d1.html`
/// becomes `thong tu 80 2024 bo tai chinh 381826`: the first directory and
/// the `-d<n>` suffix are dropped, hyphens become spaces and the numeric id
/// is kept for uniqueness. URLs without that shape fall back to a slug plus
/// a short hash of the URL.
pub fn document_stem(page_url: &str) -> String {
    match readable_stem(page_url) {
        Some(stem) => stem,
        None => fallback_stem(page_url),
    }
}

fn readable_stem(page_url: &str) -> Option<String> {
    let path = PAGE_PATH.captures(page_url.trim())?.get(1)?.as_str();
    let path = path.trim_end_matches('/');
    // Drop the first directory (the category)
    let tail = path.split_once('/').map_or(path, |(_, rest)| rest);

    let id = ID_SUFFIX.captures(tail).and_then(|c| c.get(1)).map(|m| m.as_str());
    let base = ID_SUFFIX.replace(tail, "");
    let mut name = base.replace(['-', '/'], " ").trim().to_string();
    if let Some(id) = id {
        if name.is_empty() {
            name = id.to_string();
        } else {
            name.push(' ');
            name.push_str(id);
        }
    }
    let name = sanitize(&name);
    (!name.is_empty()).then_some(name)
}

fn fallback_stem(page_url: &str) -> String {
    let slug: String = page_url
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug: String = slug.chars().rev().take(60).collect::<Vec<_>>().into_iter().rev().collect();
    let hash = blake3::hash(page_url.as_bytes()).to_hex();
    if slug.is_empty() {
        format!("document_{}", &hash[..12])
    } else {
        format!("{slug}_{}", &hash[..12])
    }
}

/// Replace illegal and control characters, collapse whitespace, cap length.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if ILLEGAL.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    trimmed.chars().take(MAX_STEM_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_category_and_suffix() {
        assert_eq!(
            document_stem(
                "https://luatvietnam.vn/tai-chinh/thong-tu-80-2024-tt-btc-381826-d1.html"
            ),
            "thong tu 80 2024 tt btc 381826"
        );
    }

    #[test]
    fn fragment_and_query_ignored() {
        assert_eq!(
            document_stem("https://luatvietnam.vn/dat-dai/luat-dat-dai-2024-296629-d1.html#taive"),
            "luat dat dai 2024 296629"
        );
        assert_eq!(
            document_stem("https://luatvietnam.vn/dat-dai/luat-dat-dai-296629-d2.html?x=1"),
            "luat dat dai 296629"
        );
    }

    #[test]
    fn without_id_suffix() {
        assert_eq!(
            document_stem("https://luatvietnam.vn/van-ban/huong-dan-chung.html"),
            "huong dan chung"
        );
    }

    #[test]
    fn single_segment_path() {
        assert_eq!(
            document_stem("https://luatvietnam.vn/nghi-dinh-15-123-d1.html"),
            "nghi dinh 15 123"
        );
    }

    #[test]
    fn fallback_is_stable_and_safe() {
        let a = document_stem("not a url at all");
        let b = document_stem("not a url at all");
        assert_eq!(a, b);
        assert!(a.starts_with("not_a_url_at_all_"));
        assert!(!a.chars().any(|c| ILLEGAL.contains(&c)));
        assert_ne!(document_stem("https://x/"), document_stem("https://y/"));
    }

    #[test]
    fn sanitize_replaces_illegal() {
        assert_eq!(sanitize("a:b*c?  d. "), "a_b_c_ d");
        assert_eq!(sanitize("..."), "");
    }
}

//! Link harvesting and URL fixing from HTML documents.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// A harvested link with text and href.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    /// Link text content
    pub text: String,
    /// Resolved href URL
    pub href: String,
}

fn anchor_selector() -> Selector {
    Selector::parse("a[href]").expect("invalid selector")
}

/// Extract links from an HTML document, resolving relative URLs against the base URL.
///
/// This extracts all `<a>` tags with href attributes, resolves relative URLs,
/// and removes duplicates (by href).
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Link> {
    let document = Html::parse_document(html);
    let selector = anchor_selector();
    collect_links(document.select(&selector), base_url)
}

/// Links below one element, e.g. the content region.
pub(crate) fn links_within(root: ElementRef<'_>, base_url: &Url) -> Vec<Link> {
    let selector = anchor_selector();
    collect_links(root.select(&selector), base_url)
}

/// Links matched by an arbitrary selector, e.g. `nav a[href]`.
pub(crate) fn links_matching(document: &Html, selector: &Selector, base_url: &Url) -> Vec<Link> {
    collect_links(document.select(selector), base_url)
}

fn collect_links<'a>(elements: impl Iterator<Item = ElementRef<'a>>, base_url: &Url) -> Vec<Link> {
    let mut seen = HashSet::new();

    elements
        .filter_map(|element| {
            let href = base_url.join(element.value().attr("href")?).ok()?.to_string();
            seen.insert(href.clone()).then(|| {
                let text = element.text().collect::<Vec<_>>().join(" ").trim().to_string();
                let text = if text.is_empty() { "[link]".to_string() } else { text };
                Link { text, href }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_relative() {
        let html = r#"
            <html>
                <body>
                    <a href="/about">About</a>
                    <a href="my-post">My post</a>
                </body>
            </html>
        "#;

        let base = Url::parse("https://example.com/writing/").unwrap();
        let links = extract_links(html, &base);

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].href, "https://example.com/about");
        assert_eq!(links[1].text, "My post");
        assert_eq!(links[1].href, "https://example.com/writing/my-post");
    }

    #[test]
    fn test_extract_links_duplicate() {
        let html = r#"
            <a href="https://example.com">First</a>
            <a href="https://example.com">Second</a>
        "#;

        let base = Url::parse("https://example.com").unwrap();
        let links = extract_links(html, &base);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "First");
    }

    #[test]
    fn test_extract_links_empty_text() {
        let html = r#"<a href="/feed.xml"></a>"#;
        let base = Url::parse("https://example.com").unwrap();
        let links = extract_links(html, &base);

        assert_eq!(links[0].text, "[link]");
    }

    #[test]
    fn test_links_matching_scopes_to_selector() {
        let html = r#"
            <nav><a href="/writing">Writing</a><a href="/about">About</a></nav>
            <main><a href="/tags/rust">rust</a></main>
        "#;
        let document = Html::parse_document(html);
        let selector = Selector::parse("nav a[href]").unwrap();
        let base = Url::parse("https://example.com/").unwrap();

        let links = links_matching(&document, &selector, &base);
        let hrefs: Vec<_> = links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(hrefs, vec!["https://example.com/writing", "https://example.com/about"]);
    }
}

//! Page extraction for soft navigation.
//!
//! A fetched page is parsed once and reduced to the parts the router swaps:
//!
//! - the content region (inner HTML of the configured selector)
//! - `<title>`, `body[data-template]`, `body[class]`
//! - the link-preview `<meta>` set and `<link rel="canonical">`
//! - the CSRF token meta, header navigation links, links inside the content
//!
//! A document without the content region is a structural mismatch; the router
//! answers that with a full load instead of a partial swap.

pub mod links;

pub use links::{Link, extract_links};

use scraper::{Html, Selector};
use shell_core::Error;
use std::collections::BTreeMap;
use url::Url;

/// `<meta>` names/properties carried across a soft navigation.
pub const TRACKED_META: &[&str] = &[
    "description",
    "og:title",
    "og:description",
    "og:url",
    "og:type",
    "og:image",
    "twitter:card",
    "twitter:title",
    "twitter:description",
    "twitter:image",
];

const CSRF_META: &str = "csrf-token";

/// Selectors used to pick a page apart.
#[derive(Debug, Clone)]
pub struct PageSelectors {
    content: Selector,
    content_source: String,
    nav_links: Selector,
}

impl PageSelectors {
    /// Build selectors for a content region such as `#main-content`.
    pub fn new(content: &str) -> Result<Self, Error> {
        let parsed = Selector::parse(content)
            .map_err(|e| Error::InvalidInput(format!("invalid content selector {content:?}: {e}")))?;
        Ok(Self {
            content: parsed,
            content_source: content.to_string(),
            nav_links: Selector::parse("nav a[href]").expect("invalid selector"),
        })
    }

    pub fn content_source(&self) -> &str {
        &self.content_source
    }
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self::new("#main-content").expect("invalid selector")
    }
}

/// The swappable parts of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    pub title: Option<String>,
    pub template: Option<String>,
    pub body_class: Option<String>,
    pub content_html: String,
    pub meta: BTreeMap<String, String>,
    pub canonical: Option<String>,
    pub csrf_token: Option<String>,
    pub nav_links: Vec<Link>,
    pub content_links: Vec<Link>,
}

/// Parse a page fetched from `base_url`.
///
/// # Errors
///
/// Returns `Error::StructureMismatch` if the content region is absent.
pub fn parse_page(html: &str, base_url: &Url, selectors: &PageSelectors) -> Result<PageDocument, Error> {
    let document = Html::parse_document(html);

    let content = document.select(&selectors.content).next().ok_or_else(|| {
        Error::StructureMismatch(format!("{} has no {}", base_url, selectors.content_source))
    })?;

    let title_selector = Selector::parse("title").expect("invalid selector");
    let title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string());

    let body_selector = Selector::parse("body").expect("invalid selector");
    let body = document.select(&body_selector).next();
    let template = body.and_then(|b| b.value().attr("data-template")).map(str::to_string);
    let body_class = body.and_then(|b| b.value().attr("class")).map(str::to_string);

    let meta_selector = Selector::parse("meta[content]").expect("invalid selector");
    let mut meta = BTreeMap::new();
    let mut csrf_token = None;
    for element in document.select(&meta_selector) {
        let attrs = element.value();
        let Some(key) = attrs.attr("name").or_else(|| attrs.attr("property")) else {
            continue;
        };
        let value = attrs.attr("content").unwrap_or_default().to_string();
        if key == CSRF_META {
            csrf_token = Some(value);
        } else if TRACKED_META.contains(&key) {
            meta.insert(key.to_string(), value);
        }
    }

    let canonical_selector = Selector::parse(r#"link[rel="canonical"][href]"#).expect("invalid selector");
    let canonical = document
        .select(&canonical_selector)
        .next()
        .and_then(|l| l.value().attr("href"))
        .map(str::to_string);

    Ok(PageDocument {
        title,
        template,
        body_class,
        content_html: content.inner_html(),
        meta,
        canonical,
        csrf_token,
        nav_links: links::links_matching(&document, &selectors.nav_links, base_url),
        content_links: links::links_within(content, base_url),
    })
}

//! The live page the router swaps content into, and the per-template module hooks.

use crate::extract::{Link, PageDocument};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// The document as the user currently sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePage {
    pub url: Url,
    pub title: String,
    pub template: Option<String>,
    pub body_class: Option<String>,
    pub meta: BTreeMap<String, String>,
    pub canonical: Option<String>,
    pub csrf_token: Option<String>,
    pub content_html: String,
    pub content_links: Vec<Link>,
    /// Header navigation. Only a full load replaces it.
    pub nav_links: Vec<Link>,
    /// Hrefs of nav links highlighted for the current path.
    pub active_links: Vec<String>,
    pub scroll_y: f64,
    /// Fragment to scroll to after the last swap.
    pub anchor: Option<String>,
}

impl LivePage {
    /// Page before anything has loaded.
    pub fn blank(url: Url) -> Self {
        Self {
            url,
            title: String::new(),
            template: None,
            body_class: None,
            meta: BTreeMap::new(),
            canonical: None,
            csrf_token: None,
            content_html: String::new(),
            content_links: Vec::new(),
            nav_links: Vec::new(),
            active_links: Vec::new(),
            scroll_y: 0.0,
            anchor: None,
        }
    }

    /// Page produced by a full browser load.
    pub fn from_document(url: Url, document: PageDocument) -> Self {
        let mut page = Self::blank(url.clone());
        page.nav_links = document.nav_links.clone();
        page.apply(url, document);
        page
    }

    /// A full load whose body lacks the content region: shown as-is.
    pub fn opaque(url: Url, body: String) -> Self {
        let mut page = Self::blank(url);
        page.content_html = body;
        page
    }

    /// Swap a fetched document into this page.
    pub fn apply(&mut self, url: Url, document: PageDocument) {
        self.title = document.title.unwrap_or_default();
        self.template = document.template;
        self.body_class = document.body_class;
        self.content_html = document.content_html;
        self.content_links = document.content_links;

        self.meta.extend(document.meta);
        if document.canonical.is_some() {
            self.canonical = document.canonical;
        }
        if document.csrf_token.is_some() {
            self.csrf_token = document.csrf_token;
        }

        self.anchor = url.fragment().filter(|f| !f.is_empty()).map(str::to_string);
        self.scroll_y = 0.0;
        self.url = url;
        self.active_links = active_links(self.url.path(), &self.nav_links);
    }
}

/// Nav links highlighted for `path`: an exact match, or any non-root link `path` is below.
pub fn active_links(path: &str, nav: &[Link]) -> Vec<String> {
    nav.iter()
        .filter(|link| {
            let Ok(href) = Url::parse(&link.href) else {
                return false;
            };
            let link_path = href.path();
            if link_path == path {
                return true;
            }
            if link_path == "/" {
                return false;
            }
            let prefix = link_path.trim_end_matches('/');
            path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
        })
        .map(|link| link.href.clone())
        .collect()
}

/// Page-specific re-initialization after a swap or load.
pub trait PageHooks: Send + Sync {
    fn page_ready(&self, page: &LivePage);
}

/// Hooks that do nothing.
pub struct NoHooks;

impl PageHooks for NoHooks {
    fn page_ready(&self, _page: &LivePage) {}
}

type Module = Box<dyn Fn(&LivePage) + Send + Sync>;

/// Modules keyed by `data-template`, plus modules that run on every page.
#[derive(Default)]
pub struct TemplateModules {
    global: Vec<Module>,
    by_template: HashMap<String, Vec<Module>>,
}

impl TemplateModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, template: &str, module: impl Fn(&LivePage) + Send + Sync + 'static) -> Self {
        self.by_template.entry(template.to_string()).or_default().push(Box::new(module));
        self
    }

    pub fn on_every(mut self, module: impl Fn(&LivePage) + Send + Sync + 'static) -> Self {
        self.global.push(Box::new(module));
        self
    }
}

impl PageHooks for TemplateModules {
    fn page_ready(&self, page: &LivePage) {
        for module in &self.global {
            module(page);
        }
        let Some(template) = page.template.as_deref() else {
            return;
        };
        if let Some(modules) = self.by_template.get(template) {
            tracing::debug!(template, count = modules.len(), "running page modules");
            for module in modules {
                module(page);
            }
        }
    }
}

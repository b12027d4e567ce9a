//! Which link activations become soft navigations.
//!
//! Everything not intercepted is left to the browser's default handling.

use crate::fetch::{is_same_origin, resolve_href};
use url::Url;

/// Keyboard modifiers held during activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub fn any(&self) -> bool {
        self.ctrl || self.meta || self.shift || self.alt
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseButton {
    #[default]
    Primary,
    Auxiliary,
    Secondary,
}

/// A click (or keyboard activation) on an anchor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkActivation {
    /// Raw `href` attribute.
    pub href: String,
    pub modifiers: Modifiers,
    pub button: MouseButton,
    /// `target` attribute, if any.
    pub target: Option<String>,
    /// Anchor carries a `download` attribute.
    pub download: bool,
}

impl LinkActivation {
    /// Plain primary-button click with no modifiers.
    pub fn click(href: impl Into<String>) -> Self {
        Self { href: href.into(), ..Default::default() }
    }
}

/// Why an activation was left to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ModifierKey,
    NonPrimaryButton,
    NewTab,
    Download,
    Unresolvable,
    CrossOrigin,
    Bypassed,
    SamePageAnchor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercept {
    Navigate(Url),
    Skip(SkipReason),
}

/// Paths that always get a real browser navigation.
#[derive(Debug, Clone)]
pub struct BypassRules {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl BypassRules {
    pub fn new(exact: Vec<String>, prefixes: Vec<String>) -> Self {
        Self { exact, prefixes }
    }

    pub fn is_bypassed(&self, path: &str) -> bool {
        self.exact.iter().any(|p| p == path) || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Default for BypassRules {
    fn default() -> Self {
        let exact = [
            "/logout",
            "/feed.xml",
            "/feed.json",
            "/sitemap.xml",
            "/robots.txt",
            "/health",
            "/metrics",
            "/manifest.json",
        ];
        let prefixes = ["/static/", "/api/", "/debug/", "/uploads/"];
        Self::new(
            exact.iter().map(|s| s.to_string()).collect(),
            prefixes.iter().map(|s| s.to_string()).collect(),
        )
    }
}

/// Decide whether `activation` on the page at `current` is a soft navigation.
pub fn evaluate(activation: &LinkActivation, current: &Url, rules: &BypassRules) -> Intercept {
    if activation.modifiers.any() {
        return Intercept::Skip(SkipReason::ModifierKey);
    }
    if activation.button != MouseButton::Primary {
        return Intercept::Skip(SkipReason::NonPrimaryButton);
    }
    if activation.target.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("_blank")) {
        return Intercept::Skip(SkipReason::NewTab);
    }
    if activation.download {
        return Intercept::Skip(SkipReason::Download);
    }

    let Ok(target) = resolve_href(current, &activation.href) else {
        return Intercept::Skip(SkipReason::Unresolvable);
    };

    if !is_same_origin(&target, current) {
        return Intercept::Skip(SkipReason::CrossOrigin);
    }
    if rules.is_bypassed(target.path()) {
        return Intercept::Skip(SkipReason::Bypassed);
    }
    if target.fragment().is_some() && target.path() == current.path() && target.query() == current.query() {
        return Intercept::Skip(SkipReason::SamePageAnchor);
    }

    Intercept::Navigate(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> Url {
        Url::parse("https://blog.example.com/writing").unwrap()
    }

    fn decide(activation: LinkActivation) -> Intercept {
        evaluate(&activation, &current(), &BypassRules::default())
    }

    #[test]
    fn test_plain_same_origin_click_is_intercepted() {
        let decision = decide(LinkActivation::click("/writing/my-post"));
        assert_eq!(
            decision,
            Intercept::Navigate(Url::parse("https://blog.example.com/writing/my-post").unwrap())
        );
    }

    #[test]
    fn test_each_modifier_skips() {
        for modifiers in [
            Modifiers { ctrl: true, ..Default::default() },
            Modifiers { meta: true, ..Default::default() },
            Modifiers { shift: true, ..Default::default() },
            Modifiers { alt: true, ..Default::default() },
        ] {
            let activation = LinkActivation { modifiers, ..LinkActivation::click("/about") };
            assert_eq!(decide(activation), Intercept::Skip(SkipReason::ModifierKey));
        }
    }

    #[test]
    fn test_non_primary_button_skips() {
        let activation = LinkActivation { button: MouseButton::Auxiliary, ..LinkActivation::click("/about") };
        assert_eq!(decide(activation), Intercept::Skip(SkipReason::NonPrimaryButton));
    }

    #[test]
    fn test_blank_target_skips() {
        let activation = LinkActivation { target: Some("_BLANK".into()), ..LinkActivation::click("/about") };
        assert_eq!(decide(activation), Intercept::Skip(SkipReason::NewTab));

        let self_target = LinkActivation { target: Some("_self".into()), ..LinkActivation::click("/about") };
        assert!(matches!(decide(self_target), Intercept::Navigate(_)));
    }

    #[test]
    fn test_download_skips() {
        let activation = LinkActivation { download: true, ..LinkActivation::click("/writing/export") };
        assert_eq!(decide(activation), Intercept::Skip(SkipReason::Download));
    }

    #[test]
    fn test_cross_origin_skips() {
        assert_eq!(
            decide(LinkActivation::click("https://github.com/someone")),
            Intercept::Skip(SkipReason::CrossOrigin)
        );
        assert_eq!(
            decide(LinkActivation::click("http://blog.example.com/about")),
            Intercept::Skip(SkipReason::CrossOrigin)
        );
    }

    #[test]
    fn test_bypass_list_and_prefixes_skip() {
        for href in ["/logout", "/feed.xml", "/feed.json", "/health", "/metrics", "/static/css/main.css", "/api/x", "/debug/memory", "/uploads/a.png"] {
            assert_eq!(decide(LinkActivation::click(href)), Intercept::Skip(SkipReason::Bypassed), "{href}");
        }
        assert!(matches!(decide(LinkActivation::click("/feed")), Intercept::Navigate(_)));
    }

    #[test]
    fn test_same_page_fragment_skips() {
        assert_eq!(decide(LinkActivation::click("#comments")), Intercept::Skip(SkipReason::SamePageAnchor));
        assert_eq!(
            decide(LinkActivation::click("/writing#top")),
            Intercept::Skip(SkipReason::SamePageAnchor)
        );
        assert!(matches!(decide(LinkActivation::click("/about#contact")), Intercept::Navigate(_)));
    }

    #[test]
    fn test_unresolvable_href_skips() {
        assert_eq!(decide(LinkActivation::click("mailto:me@example.com")), Intercept::Skip(SkipReason::Unresolvable));
        assert_eq!(decide(LinkActivation::click("")), Intercept::Skip(SkipReason::Unresolvable));
    }
}

//! Per-request routing policy of the cache agent.

/// Served straight from the network, never cached.
const NETWORK_ONLY_PREFIXES: &[&str] =
    &["/admin", "/compose", "/login", "/logout", "/api/", "/debug/", "/health", "/metrics"];

const NETWORK_ONLY_EXACT: &[&str] = &["/feed.xml", "/feed.json", "/sitemap.xml", "/robots.txt", "/manifest.json"];

pub const STATIC_PREFIX: &str = "/static/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    NetworkOnly,
    StaleWhileRevalidate,
    NetworkFirst,
}

/// Classify a same-origin GET by path. Rules are checked in order.
pub fn classify(path: &str) -> RouteClass {
    if NETWORK_ONLY_EXACT.contains(&path) || NETWORK_ONLY_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return RouteClass::NetworkOnly;
    }
    if path.starts_with(STATIC_PREFIX) {
        return RouteClass::StaleWhileRevalidate;
    }
    RouteClass::NetworkFirst
}

//! Page tools: load, click, hover, history and scroll on the shell's tab.

use super::json_output;
use crate::error::ToolError;
use crate::shell::Shell;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shell_client::router::{Modifiers, MouseButton, SkipReason};
use shell_client::{Activation, LinkActivation, NavOutcome};
use shell_core::Error;
use std::collections::BTreeMap;
use url::Url;

/// Parameters for page_load.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageLoadParams {
    /// Absolute URL, or a path resolved against the site origin.
    pub url: String,
}

/// Parameters for page_click.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PageClickParams {
    /// The link's raw href attribute.
    pub href: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    /// "primary" (default), "auxiliary" or "secondary".
    #[serde(default)]
    pub button: Option<String>,
    /// The link's target attribute.
    #[serde(default)]
    pub target: Option<String>,
    /// Whether the link carries a download attribute.
    #[serde(default)]
    pub download: bool,
}

/// Parameters for page_hover and page_leave.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageHoverParams {
    /// The link's raw href attribute.
    pub href: String,
}

/// Parameters for page_scroll.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageScrollParams {
    /// Vertical scroll offset in pixels.
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct HistoryView {
    pub url: String,
    pub scroll_y: f64,
}

/// Snapshot of the tab.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PageView {
    pub url: String,
    pub title: String,
    pub template: Option<String>,
    pub body_class: Option<String>,
    pub meta: BTreeMap<String, String>,
    pub canonical: Option<String>,
    pub active_links: Vec<String>,
    pub content_html: String,
    pub content_links: Vec<String>,
    pub scroll_y: f64,
    pub anchor: Option<String>,
    pub phase: String,
    pub history: Vec<HistoryView>,
    pub history_index: usize,
    pub prefetched: usize,
    pub prefetch_pending: usize,
}

impl PageView {
    pub fn capture(shell: &Shell) -> Self {
        let page = shell.router.page();
        let history = shell.router.history();
        let prefetcher = shell.router.prefetcher();
        Self {
            url: page.url.to_string(),
            title: page.title,
            template: page.template,
            body_class: page.body_class,
            meta: page.meta,
            canonical: page.canonical,
            active_links: page.active_links,
            content_html: page.content_html,
            content_links: page.content_links.into_iter().map(|l| l.href).collect(),
            scroll_y: page.scroll_y,
            anchor: page.anchor,
            phase: format!("{:?}", shell.router.phase()).to_lowercase(),
            history: history
                .entries()
                .iter()
                .map(|e| HistoryView { url: e.url.to_string(), scroll_y: e.scroll_y })
                .collect(),
            history_index: history.index(),
            prefetched: prefetcher.cache().len(),
            prefetch_pending: prefetcher.pending(),
        }
    }
}

/// Result of any navigating tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct NavigationOutput {
    /// "swapped", "full_reload", "cancelled", "not_intercepted" or "loaded".
    pub outcome: String,
    /// Why the activation was left to the browser.
    pub skip_reason: Option<String>,
    /// Why soft navigation fell back to a full load.
    pub reason: Option<String>,
    /// Set if the follow-up full load failed too.
    pub load_error: Option<String>,
    pub page: PageView,
}

impl NavigationOutput {
    fn new(shell: &Shell, outcome: &str) -> Self {
        Self { outcome: outcome.into(), skip_reason: None, reason: None, load_error: None, page: PageView::capture(shell) }
    }
}

fn skip_name(reason: SkipReason) -> String {
    let name = match reason {
        SkipReason::ModifierKey => "modifier_key",
        SkipReason::NonPrimaryButton => "non_primary_button",
        SkipReason::NewTab => "new_tab",
        SkipReason::Download => "download",
        SkipReason::Unresolvable => "unresolvable",
        SkipReason::CrossOrigin => "cross_origin",
        SkipReason::Bypassed => "bypassed",
        SkipReason::SamePageAnchor => "same_page_anchor",
    };
    name.to_string()
}

fn parse_button(button: Option<&str>) -> Result<MouseButton, ToolError> {
    match button.unwrap_or("primary") {
        "primary" | "left" => Ok(MouseButton::Primary),
        "auxiliary" | "middle" => Ok(MouseButton::Auxiliary),
        "secondary" | "right" => Ok(MouseButton::Secondary),
        other => Err(ToolError::InvalidInput(format!("unknown mouse button: {other}"))),
    }
}

fn resolve(shell: &Shell, target: &str) -> Result<Url, Error> {
    if target.trim().is_empty() {
        return Err(Error::InvalidInput("url cannot be empty".into()));
    }
    let origin = shell.config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
    origin.join(target).map_err(|e| Error::InvalidUrl(format!("{target}: {e}")))
}

async fn settle_outcome(shell: &Shell, outcome: NavOutcome) -> NavigationOutput {
    match outcome {
        NavOutcome::Swapped { .. } => NavigationOutput::new(shell, "swapped"),
        NavOutcome::Cancelled => NavigationOutput::new(shell, "cancelled"),
        NavOutcome::FullReload { ref reason, .. } => {
            let reason = reason.clone();
            let load_error = shell.follow(&outcome).await;
            NavigationOutput { reason: Some(reason), load_error, ..NavigationOutput::new(shell, "full_reload") }
        }
    }
}

pub async fn load_impl(shell: &Shell, params: PageLoadParams) -> Result<CallToolResult, McpError> {
    let url = resolve(shell, &params.url)?;
    shell.router.load(url).await?;
    json_output(&NavigationOutput::new(shell, "loaded"))
}

pub async fn click_impl(shell: &Shell, params: PageClickParams) -> Result<CallToolResult, McpError> {
    let activation = LinkActivation {
        button: parse_button(params.button.as_deref())?,
        href: params.href,
        modifiers: Modifiers { ctrl: params.ctrl, meta: params.meta, shift: params.shift, alt: params.alt },
        target: params.target,
        download: params.download,
    };

    let output = match shell.router.activate(&activation).await {
        Activation::NotIntercepted(reason) => NavigationOutput {
            skip_reason: Some(skip_name(reason)),
            ..NavigationOutput::new(shell, "not_intercepted")
        },
        Activation::Intercepted(outcome) => settle_outcome(shell, outcome).await,
    };
    json_output(&output)
}

pub async fn back_impl(shell: &Shell) -> Result<CallToolResult, McpError> {
    let output = match shell.router.back().await {
        Some(outcome) => settle_outcome(shell, outcome).await,
        None => NavigationOutput::new(shell, "at_start"),
    };
    json_output(&output)
}

pub async fn forward_impl(shell: &Shell) -> Result<CallToolResult, McpError> {
    let output = match shell.router.forward().await {
        Some(outcome) => settle_outcome(shell, outcome).await,
        None => NavigationOutput::new(shell, "at_end"),
    };
    json_output(&output)
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct HoverOutput {
    pub scheduled: bool,
    pub prefetch_pending: usize,
}

pub fn hover_impl(shell: &Shell, params: PageHoverParams) -> Result<CallToolResult, McpError> {
    let scheduled = shell.router.hover(&params.href);
    json_output(&HoverOutput { scheduled, prefetch_pending: shell.router.prefetcher().pending() })
}

pub fn leave_impl(shell: &Shell, params: PageHoverParams) -> Result<CallToolResult, McpError> {
    shell.router.leave(&params.href);
    json_output(&HoverOutput { scheduled: false, prefetch_pending: shell.router.prefetcher().pending() })
}

pub fn scroll_impl(shell: &Shell, params: PageScrollParams) -> Result<CallToolResult, McpError> {
    if !params.y.is_finite() {
        return Err(ToolError::InvalidInput("scroll offset must be finite".into()).into());
    }
    shell.router.set_scroll(params.y);
    json_output(&PageView::capture(shell))
}

pub fn state_impl(shell: &Shell) -> Result<CallToolResult, McpError> {
    json_output(&PageView::capture(shell))
}

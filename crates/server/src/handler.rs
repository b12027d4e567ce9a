//! MCP server handler: routes tool calls to the shell.
use crate::shell::Shell;
use crate::tools::agent::{AgentClearParams, clear_impl, status_impl};
use crate::tools::compose::{ComposeSubmitParams, submit_impl};
use crate::tools::network::{NetworkSetParams, set_impl};
use crate::tools::page::{
    PageClickParams, PageHoverParams, PageLoadParams, PageScrollParams, back_impl, click_impl, forward_impl,
    hover_impl, leave_impl, load_impl, scroll_impl, state_impl,
};
use crate::tools::queue::{drain_impl, list_impl};
use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

#[derive(Clone)]
pub struct ShellServer {
    shell: Arc<Shell>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ShellServer {
    pub fn new(shell: Arc<Shell>) -> Self {
        Self { shell, tool_router: Self::tool_router() }
    }

    #[tool(description = "Full browser load of a URL or site path. Replaces the whole page, including navigation.")]
    async fn page_load(&self, params: Parameters<PageLoadParams>) -> Result<CallToolResult, McpError> {
        load_impl(&self.shell, params.0).await
    }

    /// Same-origin primary clicks are soft-navigated; everything else is reported as not intercepted.
    #[tool(
        description = "Click a link on the current page. Same-origin plain clicks swap the content region in place; modified clicks, new-tab targets, downloads and bypassed paths are left to the browser."
    )]
    async fn page_click(&self, params: Parameters<PageClickParams>) -> Result<CallToolResult, McpError> {
        click_impl(&self.shell, params.0).await
    }

    #[tool(description = "Move the pointer onto a link. Schedules a debounced prefetch of same-origin pages.")]
    async fn page_hover(&self, params: Parameters<PageHoverParams>) -> Result<CallToolResult, McpError> {
        hover_impl(&self.shell, params.0)
    }

    #[tool(description = "Move the pointer off a link, cancelling a prefetch that has not started.")]
    async fn page_leave(&self, params: Parameters<PageHoverParams>) -> Result<CallToolResult, McpError> {
        leave_impl(&self.shell, params.0)
    }

    #[tool(description = "Go back one history entry, restoring its scroll position.")]
    async fn page_back(&self) -> Result<CallToolResult, McpError> {
        back_impl(&self.shell).await
    }

    #[tool(description = "Go forward one history entry, restoring its scroll position.")]
    async fn page_forward(&self) -> Result<CallToolResult, McpError> {
        forward_impl(&self.shell).await
    }

    #[tool(description = "Set the vertical scroll offset of the current page.")]
    async fn page_scroll(&self, params: Parameters<PageScrollParams>) -> Result<CallToolResult, McpError> {
        scroll_impl(&self.shell, params.0)
    }

    #[tool(description = "Snapshot of the current page: title, template, meta, active nav links, content and history.")]
    async fn page_state(&self) -> Result<CallToolResult, McpError> {
        state_impl(&self.shell)
    }

    #[tool(
        description = "Quick-publish a post. Published immediately when online; saved to the offline queue when the origin is unreachable."
    )]
    async fn compose_submit(&self, params: Parameters<ComposeSubmitParams>) -> Result<CallToolResult, McpError> {
        submit_impl(&self.shell, params.0).await
    }

    #[tool(description = "List submissions waiting in the offline queue, oldest first.")]
    async fn queue_list(&self) -> Result<CallToolResult, McpError> {
        list_impl(&self.shell).await
    }

    #[tool(description = "Replay queued submissions in order, stopping at the first failure.")]
    async fn queue_drain(&self) -> Result<CallToolResult, McpError> {
        drain_impl(&self.shell).await
    }

    #[tool(description = "Take the tab offline or bring it back online. Reconnecting drains the offline queue.")]
    async fn network_set(&self, params: Parameters<NetworkSetParams>) -> Result<CallToolResult, McpError> {
        set_impl(&self.shell, params.0).await
    }

    #[tool(description = "Cache agent phase, version, tiers with entry counts, and ignored background failures.")]
    async fn agent_status(&self) -> Result<CallToolResult, McpError> {
        status_impl(&self.shell).await
    }

    #[tool(description = "Delete the current cache tiers, then reinstall unless reinstall is false.")]
    async fn agent_clear(&self, params: Parameters<AgentClearParams>) -> Result<CallToolResult, McpError> {
        clear_impl(&self.shell, params.0).await
    }
}

impl ServerHandler for ShellServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "markgo-shell".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

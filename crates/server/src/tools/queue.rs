//! Inspect and replay the offline submission queue.

use super::json_output;
use crate::shell::Shell;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shell_core::QueuedMutation;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueListOutput {
    pub items: Vec<QueuedMutation>,
    pub draining: bool,
}

pub async fn list_impl(shell: &Shell) -> Result<CallToolResult, McpError> {
    let items = shell.queue.list().await?;
    json_output(&QueueListOutput { items, draining: shell.queue.is_draining() })
}

/// Replay queued submissions in order, stopping at the first failure.
pub async fn drain_impl(shell: &Shell) -> Result<CallToolResult, McpError> {
    let outcome = shell.queue.drain().await?;
    json_output(&outcome)
}

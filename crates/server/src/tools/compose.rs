//! Quick-publish from the compose form.

use super::json_output;
use crate::shell::Shell;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shell_core::MutationPayload;

/// Parameters for compose_submit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ComposeSubmitParams {
    /// Post body. Must not be blank.
    pub content: String,
    /// Optional title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Submit a post, queueing it if the origin cannot be reached.
///
/// The output is the submit outcome tagged by `status`: `published` with the
/// receipt fields, `queued` with the queue id, or `unsaved` with the store error.
pub async fn submit_impl(shell: &Shell, params: ComposeSubmitParams) -> Result<CallToolResult, McpError> {
    let mut payload = MutationPayload::new(params.content);
    if let Some(title) = params.title.filter(|t| !t.trim().is_empty()) {
        payload = payload.with_title(title);
    }

    let outcome = shell.queue.submit(payload).await?;
    json_output(&outcome)
}
